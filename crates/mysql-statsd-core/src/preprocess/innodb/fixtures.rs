//! Captured status blobs and the stats they must produce.

use std::collections::BTreeMap;

use crate::metric::MetricValue;

/// A 5.5-era dump with two buffer pools, a lock wait and two semaphore waits.
pub const MYSQL_55_STATUS: &str = "\
=====================================
110915 15:34:37 INNODB MONITOR OUTPUT
=====================================
Per second averages calculated from the last 17 seconds
-----------------
BACKGROUND THREAD
-----------------
srv_master_thread loops: 1034 1_second, 1033 sleeps, 102 10_second, 4 background, 4 flush
srv_master_thread log flush and writes: 1033
----------
SEMAPHORES
----------
OS WAIT ARRAY INFO: reservation count 382813, signal count 364536
--Thread 1167767872 has waited at btr/btr0sea.c line 1156 for 1.50 seconds the semaphore:
S-lock on RW-latch at 0x2b37c4fa6ab8 '&btr_search_latch'
--Thread 1167770624 has waited at trx/trx0trx.c line 195 for 0.50 seconds the semaphore:
Mutex at 0x1a5e1c8 '&kernel_mutex', lock var 1
Mutex spin waits 5870888, rounds 19812448, OS waits 375285
RW-shared spins 204324, rounds 6134587, OS waits 201658
RW-excl spins 18, rounds 540, OS waits 17
Spin rounds per wait: 3.37 mutex, 30.02 RW-shared, 30.00 RW-excl
------------
TRANSACTIONS
------------
Trx id counter 0 1170664159
Purge done for trx's n:o < 0 1170663853 undo n:o < 0 0
History list length 132
---OLDEST VIEW---
Normal read view
Read view low limit trx n:o 0 1170664130
Read view up limit trx id 0 1170664130
----------------------------
LIST OF TRANSACTIONS FOR EACH SESSION:
---TRANSACTION 0 0, not started, process no 13510, OS thread id 1170446656
MySQL thread id 10, query id 4096 localhost root
SHOW ENGINE INNODB STATUS
---TRANSACTION 0 1170664158, ACTIVE 3 sec, process no 13510, OS thread id 1175836992 starting index read
mysql tables in use 2, locked 2
LOCK WAIT 2 lock struct(s), heap size 368
MySQL thread id 8, query id 4095 localhost root Updating
UPDATE t SET a = 1 WHERE id = 5
------- TRX HAS BEEN WAITING 3 SEC FOR THIS LOCK TO BE GRANTED:
RECORD LOCKS space id 0 page no 3 n bits 72 index `PRIMARY` of table `test`.`t` trx id 0 1170664158 lock_mode X locks rec but not gap waiting
------------------
---TRANSACTION 0 1170664150, ACTIVE 10 sec, process no 13510, OS thread id 1175570752
3 lock struct(s), heap size 1024, undo log entries 1
MySQL thread id 9, query id 4090 localhost root
--------
FILE I/O
--------
I/O thread 0 state: waiting for i/o request (insert buffer thread)
Pending normal aio reads: 0, aio writes: 0,
 ibuf aio reads: 0, log i/o's: 0, sync i/o's: 0
Pending flushes (fsync) log: 0; buffer pool: 0
8782182 OS file reads, 15635445 OS file writes, 947800 OS fsyncs
0.00 reads/s, 0 avg bytes/read, 12.35 writes/s, 0.94 fsyncs/s
-------------------------------------
INSERT BUFFER AND ADAPTIVE HASH INDEX
-------------------------------------
Ibuf: size 1, free list len 4634, seg size 4636, 4 merges
merged operations:
 insert 593983, delete mark 387006, delete 73092
discarded operations:
 insert 0, delete mark 0, delete 0
Hash table size 4425293, used cells 4229064, node heap has 10 buffer(s)
19.88 hash searches/s, 101.35 non-hash searches/s
---
LOG
---
Log sequence number 125 3934414864
Log flushed up to   125 3934414864
Last checkpoint at  125 3934293461
0 pending log writes, 0 pending chkp writes
3430041 log i/o's done, 17.44 log i/o's/second
----------------------
BUFFER POOL AND MEMORY
----------------------
Total memory allocated 29642194944; in additional pool allocated 0
Dictionary memory allocated 145525560
Buffer pool size   1769471
Free buffers       0
Database pages     1696503
Old database pages 626107
Modified db pages  160602
Pending reads 0
Pending writes: LRU 0, flush list 0, single page 0
Pages made young 290, not young 0
0.50 youngs/s, 0.00 non-youngs/s
Pages read 15240822, created 1770238, written 21705836
0.00 reads/s, 40.76 creates/s, 137.97 writes/s
Buffer pool hit rate 1000 / 1000, young-making rate 0 / 1000 not 0 / 1000
Pages read ahead 0.00/s, evicted without access 0.00/s, Random read ahead 0.00/s
LRU len: 1696503, unzip_LRU len: 0
I/O sum[29174]:cur[285], unzip sum[0]:cur[0]
----------------------
INDIVIDUAL BUFFER POOL INFO
----------------------
---BUFFER POOL 0
Buffer pool size   884735
Buffer pool size, bytes 14495514624
Free buffers       0
Database pages     848251
Modified db pages  80301
Pages read ahead 0.00/s, evicted without access 0.00/s, Random read ahead 0.00/s
---BUFFER POOL 1
Buffer pool size   884736
Free buffers       12
Database pages     848252
Modified db pages  80302
--------------
ROW OPERATIONS
--------------
0 queries inside InnoDB, 0 queries in queue
1 read views open inside InnoDB
Main thread process no. 13510, id 1172781376, state: sleeping
Number of rows inserted 50678311, updated 66425915, deleted 20605903, read 454561562
0.00 inserts/s, 0.00 updates/s, 0.00 deletes/s, 0.00 reads/s
----------------------------
END OF INNODB MONITOR OUTPUT
============================
";

/// Every stat [`MYSQL_55_STATUS`] produces.
pub fn mysql_55_expected() -> BTreeMap<String, MetricValue> {
    let text = [
        // SEMAPHORES
        ("spin_waits", "5870888"),
        ("spin_rounds", "19812448"),
        ("os_waits", "375285"),
        ("rw_shared_spins", "204324"),
        ("rw_shared_rounds", "6134587"),
        ("rw_shared_os_waits", "201658"),
        ("rw_excl_spins", "18"),
        ("rw_excl_rounds", "540"),
        ("rw_excl_os_waits", "17"),
        // TRANSACTIONS
        ("history_list", "132"),
        // FILE I/O
        ("pending_normal_aio_reads", "0"),
        ("pending_normal_aio_writes", "0"),
        ("pending_ibuf_aio_reads", "0"),
        ("pending_aio_log_ios", "0"),
        ("pending_aio_sync_ios", "0"),
        ("pending_log_flushes", "0"),
        ("pending_buf_pool_flushes", "0"),
        ("file_reads", "8782182"),
        ("file_writes", "15635445"),
        ("file_fsyncs", "947800"),
        // INSERT BUFFER AND ADAPTIVE HASH INDEX
        ("ibuf_used_cells", "1"),
        ("ibuf_free_cells", "4634"),
        ("ibuf_cell_count", "4636"),
        ("ibuf_merges", "4"),
        ("ibuf_inserts", "593983"),
        ("hash_index_cells_total", "4425293"),
        ("hash_index_cells_used", "4229064"),
        // LOG
        ("pending_log_writes", "0"),
        ("pending_chkp_writes", "0"),
        ("log_writes", "3430041"),
        // BUFFER POOL AND MEMORY
        ("total_mem_alloc", "29642194944"),
        ("additional_pool_alloc", "0"),
        ("dictionary_cache_memory", "145525560"),
        ("pool_size", "1769471"),
        ("free_pages", "0"),
        ("database_pages", "1696503"),
        ("old_database_pages", "626107"),
        ("modified_pages", "160602"),
        ("pending_reads", "0"),
        ("pending_writes_lru", "0"),
        ("pending_writes_flush_list", "0"),
        ("pending_writes_single_page", "0"),
        ("pages_made_young", "290"),
        ("pages_not_young", "0"),
        ("pages_made_young_ps", "0.50"),
        ("pages_not_young_ps", "0.00"),
        ("pages_read", "15240822"),
        ("pages_created", "1770238"),
        ("pages_written", "21705836"),
        ("pages_read_ps", "0.00"),
        ("pages_created_ps", "40.76"),
        ("pages_written_ps", "137.97"),
        ("buffer_pool_hits", "1000"),
        ("buffer_pool_hit_total", "1000"),
        ("buffer_pool_young", "0"),
        ("buffer_pool_not_young", "0"),
        ("pages_read_ahead", "0.00"),
        ("pages_read_evicted", "0.00"),
        ("pages_read_random", "0.00"),
        ("lru_len", "1696503"),
        ("lru_unzip", "0"),
        ("io_sum", "29174"),
        ("io_sum_cur", "285"),
        ("io_unzip", "0"),
        ("io_unzip_cur", "0"),
        // ROW OPERATIONS
        ("queries_inside", "0"),
        ("queries_queued", "0"),
        ("read_views", "1"),
        ("rows_inserted", "50678311"),
        ("rows_updated", "66425915"),
        ("rows_deleted", "20605903"),
        ("rows_read", "454561562"),
        // INDIVIDUAL BUFFER POOL INFO
        ("bufferpool_0.pool_size", "884735"),
        ("bufferpool_0.pool_size_bytes", "14495514624"),
        ("bufferpool_0.free_pages", "0"),
        ("bufferpool_0.database_pages", "848251"),
        ("bufferpool_0.modified_pages", "80301"),
        ("bufferpool_0.pages_read_ahead", "0.00"),
        ("bufferpool_0.pages_read_evicted", "0.00"),
        ("bufferpool_0.pages_read_random", "0.00"),
        ("bufferpool_1.pool_size", "884736"),
        ("bufferpool_1.free_pages", "12"),
        ("bufferpool_1.database_pages", "848252"),
        ("bufferpool_1.modified_pages", "80302"),
    ];

    let computed = [
        ("innodb_sem_waits", MetricValue::Int(2)),
        ("innodb_sem_wait_time_ms", MetricValue::Float(2000.0)),
        ("innodb_transactions", MetricValue::Int(1170664159)),
        ("unpurged_txns", MetricValue::Int(306)),
        ("current_transactions", MetricValue::Int(3)),
        ("active_transactions", MetricValue::Int(2)),
        ("innodb_tables_in_use", MetricValue::Int(2)),
        ("innodb_locked_tables", MetricValue::Int(2)),
        ("innodb_lock_structs", MetricValue::Int(5)),
        ("locked_transactions", MetricValue::Int(1)),
        ("innodb_lock_wait_secs", MetricValue::Int(3)),
        ("ibuf_merged", MetricValue::Int(1054081)),
        ("log_bytes_written", MetricValue::Int(540805326864)),
        ("log_bytes_flushed", MetricValue::Int(540805326864)),
        ("last_checkpoint", MetricValue::Int(540805205461)),
    ];

    text.into_iter()
        .map(|(k, v)| (k.to_string(), MetricValue::text(v)))
        .chain(computed.into_iter().map(|(k, v)| (k.to_string(), v)))
        .collect()
}

/// A 5.1-plugin style TRANSACTIONS section with hexadecimal ids.
pub const MYSQL_51_TRANSACTIONS: &str = "\
------------
TRANSACTIONS
------------
Trx id counter 861B144C
Purge done for trx's n:o < 861B135D undo n:o < 0
History list length 132
LIST OF TRANSACTIONS FOR EACH SESSION:
---TRANSACTION 0, not started, process no 3396, OS thread id 139701916944128
MySQL thread id 33, query id 2412 localhost root
show engine innodb status
---
LOG
---
Log sequence number 13093949495856
";
