//! Sync driver end to end: ranges, tip following, resume, idempotence, QA.

use std::fs;

use chrono::NaiveDate;
use onchain_core::constants::SCHEMA_VERSION;
use onchain_core::error::DecodeError;
use onchain_core::ledger::{HeightLedger, MemoryLedger};
use onchain_core::types::{BlockHash, Dataset, RecordCounts};
use onchain_ingest::error::{QaError, SyncError};
use onchain_ingest::progress::{ProgressReport, file_counts};
use onchain_ingest::scan::{dataset_files, schema_version};
use onchain_ingest::{MarkerLedger, SyncDriver, SyncLimits, qa};
use onchain_tests::helpers::*;
use tempfile::TempDir;

/// Rows produced by heights `0..n` of a fixture chain.
fn expected_counts(n: u64) -> RecordCounts {
    let spends = n.saturating_sub(1);
    RecordCounts { blocks: n, transactions: n + spends, inputs: n + spends, outputs: n + 2 * spends }
}

#[tokio::test]
async fn range_writes_every_dataset_and_marks_heights() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(6, 'a'));
    let mut driver = disk_driver(tmp.path(), &chain);

    let report = driver.sync_range(0, 5).await.unwrap();
    assert_eq!(report.committed, 6);
    assert_eq!(report.counts, expected_counts(6));
    assert_eq!(report.rewinds, 0);
    assert_eq!(report.max_height, Some(5));

    let ledger = driver.ledger();
    assert_eq!(ledger.heights().unwrap(), (0..=5).collect::<Vec<_>>());
    for h in 0..=5 {
        assert_eq!(ledger.hash_for(h).unwrap(), Some(BlockHash::new(block_hash(h, 'a'))));
    }

    let hashes = stored_block_hashes(tmp.path());
    assert_eq!(hashes.len(), 6);
    assert_eq!(hashes[&3], block_hash(3, 'a'));

    // Two heights per bucket, one file per height per dataset.
    let blocks = dataset_files(tmp.path(), Dataset::Blocks).unwrap();
    assert_eq!(blocks.len(), 6);
    assert!(blocks[2].to_string_lossy().contains("height=2"));
    assert!(tmp.path().join("outputs/height=4").is_dir());

    let txids = stored_txids(tmp.path(), Dataset::Transactions);
    assert_eq!(txids.len(), 11);
    assert!(txids.contains(&spend_txid(5, 'a')));
}

#[tokio::test]
async fn every_file_carries_schema_version() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(3, 'a'));
    disk_driver(tmp.path(), &chain).sync_range(0, 2).await.unwrap();

    for dataset in Dataset::ALL {
        let files = dataset_files(tmp.path(), dataset).unwrap();
        assert!(!files.is_empty(), "{dataset} has no files");
        for file in files {
            assert_eq!(schema_version(&file).unwrap().as_deref(), Some(SCHEMA_VERSION));
        }
    }
}

#[tokio::test]
async fn second_run_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(5, 'a'));
    disk_driver(tmp.path(), &chain).sync_range(0, 4).await.unwrap();
    let before = snapshot(tmp.path());
    let fetches = chain.block_fetches();

    let report = disk_driver(tmp.path(), &chain).sync_range(0, 4).await.unwrap();
    assert!(report.is_idle());
    assert_eq!(report.counts, RecordCounts::default());
    assert_eq!(chain.block_fetches(), fetches);
    assert_eq!(snapshot(tmp.path()), before);
}

#[tokio::test]
async fn resume_picks_up_after_last_marker() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(8, 'a'));
    disk_driver(tmp.path(), &chain).sync_range(0, 2).await.unwrap();

    let mut driver = disk_driver(tmp.path(), &chain);
    assert_eq!(driver.ledger().next_height(), 3);
    let fetches = chain.block_fetches();
    let report = driver.sync_from_tip(100).await.unwrap();

    assert_eq!((report.start, report.end), (3, 7));
    assert_eq!(report.committed, 5);
    assert_eq!(chain.block_fetches() - fetches, 5);
    assert_eq!(driver.ledger().heights().unwrap(), (0..=7).collect::<Vec<_>>());
}

#[tokio::test]
async fn height_with_files_but_no_marker_is_redone() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(4, 'a'));
    disk_driver(tmp.path(), &chain).sync_range(0, 3).await.unwrap();
    let before = snapshot(tmp.path());

    // A crash between flush and mark leaves exactly this state.
    let ledger = MarkerLedger::open(tmp.path()).unwrap();
    fs::remove_file(ledger.marker_path(2)).unwrap();

    let report = disk_driver(tmp.path(), &chain).sync_range(0, 3).await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(report.counts, RecordCounts { blocks: 1, transactions: 2, inputs: 2, outputs: 3 });
    // Re-ingesting the same block rewrites the same file names.
    assert_eq!(
        snapshot(tmp.path()).keys().collect::<Vec<_>>(),
        before.keys().collect::<Vec<_>>()
    );
    assert_eq!(stored_block_hashes(tmp.path()).len(), 4);
}

#[tokio::test]
async fn caught_up_run_does_nothing() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(3, 'a'));
    let mut driver = disk_driver(tmp.path(), &chain);
    driver.sync_from_tip(10).await.unwrap();

    let report = driver.sync_from_tip(10).await.unwrap();
    assert!(report.is_idle());
    assert_eq!((report.start, report.end), (3, 2));
    assert_eq!(report.max_height, Some(2));
}

#[tokio::test]
async fn tip_budget_caps_the_run() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(10, 'a'));
    let mut driver = disk_driver(tmp.path(), &chain);

    let report = driver.sync_from_tip(4).await.unwrap();
    assert_eq!((report.start, report.end), (0, 3));
    let report = driver.sync_from_tip(4).await.unwrap();
    assert_eq!((report.start, report.end), (4, 7));
    let report = driver.sync_from_tip(4).await.unwrap();
    assert_eq!((report.start, report.end), (8, 9));
    assert_eq!(driver.ledger().max_height(), Some(9));
}

#[tokio::test]
async fn range_is_clamped_to_run_limit() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(10, 'a'));
    let limits = SyncLimits { max_blocks_per_run: 3, ..test_limits() };
    let mut driver = SyncDriver::new(chain.clone(), MemoryLedger::new(), test_writer(tmp.path()), limits);

    let report = driver.sync_range(2, 9).await.unwrap();
    assert_eq!((report.start, report.end), (2, 4));
    assert_eq!(driver.ledger().heights().unwrap(), vec![2, 3, 4]);

    // The run limit also bounds tip following.
    let report = driver.sync_from_tip(100).await.unwrap();
    assert_eq!((report.start, report.end), (5, 7));
}

#[tokio::test]
async fn inverted_range_and_zero_budget_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(3, 'a'));
    let mut driver = disk_driver(tmp.path(), &chain);

    assert!(matches!(
        driver.sync_range(5, 2).await,
        Err(SyncError::InvalidRange { start: 5, end: 2 })
    ));
    assert!(matches!(driver.sync_from_tip(0).await, Err(SyncError::InvalidBudget)));
    assert_eq!(chain.block_fetches(), 0);
}

#[tokio::test]
async fn single_height_range() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(3, 'a'));
    let report = disk_driver(tmp.path(), &chain).sync_range(1, 1).await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(stored_block_hashes(tmp.path()).keys().copied().collect::<Vec<_>>(), vec![1]);
}

#[tokio::test]
async fn undecodable_block_halts_before_marking() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(6, 'a'));
    chain.edit_block(3, |b| b.time = None);
    let mut driver = disk_driver(tmp.path(), &chain);

    let err = driver.sync_range(0, 5).await.unwrap_err();
    assert!(matches!(err, SyncError::Decode(DecodeError::MissingField { height: 3, field: "time" })));

    assert_eq!(driver.ledger().heights().unwrap(), vec![0, 1, 2]);
    assert!(!driver.writer().file_path(Dataset::Blocks, 3).exists());
    assert_eq!(stored_block_hashes(tmp.path()).len(), 3);
}

#[tokio::test]
async fn source_failure_aborts_run() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(3, 'a'));
    let mut driver = disk_driver(tmp.path(), &chain);

    // Heights past the node's tip are not served.
    let err = driver.sync_range(0, 4).await.unwrap_err();
    assert!(matches!(err, SyncError::Source(_)));
    assert_eq!(driver.ledger().max_height(), Some(2));
}

#[tokio::test]
async fn markers_stay_contiguous_across_runs() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(12, 'a'));
    for _ in 0..4 {
        disk_driver(tmp.path(), &chain).sync_from_tip(3).await.unwrap();
        let heights = MarkerLedger::open(tmp.path()).unwrap().heights().unwrap();
        let max = *heights.last().unwrap();
        assert_eq!(heights, (0..=max).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn progress_reflects_disk_state() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(8, 'a'));
    let mut driver = disk_driver(tmp.path(), &chain);
    driver.sync_range(0, 2).await.unwrap();
    driver.sync_range(5, 6).await.unwrap();

    let heights = driver.ledger().heights().unwrap();
    let files = file_counts(tmp.path()).unwrap();
    let report = ProgressReport::new(&heights, files, Some(7));
    assert_eq!(report.markers, 5);
    assert_eq!(report.gaps, vec![(3, 4)]);
    assert_eq!(report.files[&Dataset::Blocks], 5);
    assert_eq!(report.remaining(), Some(3));
}

fn genesis_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2009, 1, 3).unwrap()
}

#[tokio::test]
async fn golden_day_matches_ingested_data() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(6, 'a'));
    disk_driver(tmp.path(), &chain).sync_range(0, 5).await.unwrap();

    let measured = qa::measure_day(tmp.path(), genesis_day()).unwrap();
    assert_eq!(measured.blocks, 6);
    assert_eq!(measured.transactions, 11);
    assert_eq!(measured.coinbase_sats, 6 * SUBSIDY_SATS);

    let refs = tmp.path().join("golden.json");
    fs::write(
        &refs,
        serde_json::json!({
            "2009-01-03": {"blocks": 6, "transactions": 11, "coinbase_sats": 6 * SUBSIDY_SATS},
            "2009-01-04": {"blocks": 0, "transactions": 0, "coinbase_sats": 0},
        })
        .to_string(),
    )
    .unwrap();
    let outcome = qa::verify_day(tmp.path(), &refs, genesis_day(), 0.0).unwrap();
    assert_eq!(outcome.measured, measured);

    let next_day = genesis_day().succ_opt().unwrap();
    let empty = qa::verify_day(tmp.path(), &refs, next_day, 0.0).unwrap();
    assert_eq!(empty.measured.blocks, 0);
}

#[tokio::test]
async fn repeated_coinbase_txid_counts_every_transaction_row() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(6, 'a'));
    // Height 4's coinbase reuses height 3's txid.
    chain.edit_block(4, |b| b.transactions[0].txid = Some(coinbase_txid(3, 'a')));
    disk_driver(tmp.path(), &chain).sync_range(0, 5).await.unwrap();

    let measured = qa::measure_day(tmp.path(), genesis_day()).unwrap();
    assert_eq!(measured.blocks, 6);
    assert_eq!(measured.transactions, 11);
    assert_eq!(measured.coinbase_sats, 6 * SUBSIDY_SATS);
}

#[tokio::test]
async fn golden_day_outside_tolerance_fails() {
    let tmp = TempDir::new().unwrap();
    let chain = FakeChain::new(make_chain(6, 'a'));
    disk_driver(tmp.path(), &chain).sync_range(0, 5).await.unwrap();

    let refs = tmp.path().join("golden.json");
    // 10 blocks expected, 6 ingested: 40% off. Transactions within 10%.
    fs::write(
        &refs,
        r#"{"2009-01-03": {"blocks": 10, "transactions": 12, "coinbase_sats": 30000000000, "tolerance_pct": 10.0}}"#,
    )
    .unwrap();

    match qa::verify_day(tmp.path(), &refs, genesis_day(), 0.5) {
        Err(QaError::OutsideTolerance { date, violations }) => {
            assert_eq!(date, "2009-01-03");
            assert_eq!(violations.len(), 1);
            assert!(violations[0].starts_with("blocks delta=40.0000%"));
        }
        other => panic!("expected OutsideTolerance, got {other:?}"),
    }

    let missing = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap();
    assert!(matches!(
        qa::verify_day(tmp.path(), &refs, missing, 0.5),
        Err(QaError::MissingReference(_))
    ));
}
