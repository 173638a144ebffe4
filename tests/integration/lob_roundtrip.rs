#![allow(missing_docs)]

use std::sync::Arc;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sombra_lob::{
    lob::{FilAddr, LobReport},
    LobError, LobFormat, LobOptions, LobStore, PageNo, PageStore, Pager, PagerOptions, Result,
    Stamp, TrxId,
};

fn open(format: LobFormat, page_size: u32) -> Result<(Arc<Pager>, LobStore)> {
    let pager = Arc::new(Pager::new(PagerOptions::default().with_page_size(page_size))?);
    let options = LobOptions::default()
        .format(format)
        .zlib_chunk_size(16 * 1024)
        .validate(true);
    let store = LobStore::new(pager.clone(), options)?;
    Ok((pager, store))
}

fn stamp(trx: u64) -> Stamp {
    Stamp::new(TrxId(trx), 1)
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn text_bytes(len: usize) -> Vec<u8> {
    b"sombra stores large values on pages of their own. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

#[test]
fn round_trips_assorted_sizes() -> Result<()> {
    for format in [LobFormat::Uncompressed, LobFormat::Compressed] {
        let (_pager, store) = open(format, 16 * 1024)?;
        for (i, len) in [0usize, 1, 693, 15_690, 15_691, 50_000, 200_000].into_iter().enumerate() {
            for value in [random_bytes(i as u64, len), text_bytes(len)] {
                let lob = store.insert(stamp(1), &value)?;
                assert_eq!(lob.length as usize, len);
                assert_eq!(store.read(&lob, 0, len)?, value, "{format:?} len {len}");
            }
        }
    }
    Ok(())
}

#[test]
fn fifty_kib_value_spans_first_page_and_three_data_pages() -> Result<()> {
    let (pager, store) = open(LobFormat::Uncompressed, 16 * 1024)?;
    let value = random_bytes(7, 50_000);
    let lob = store.insert(stamp(3), &value)?;

    let info = store.get_info(&lob)?;
    assert_eq!(info.pages, 4);
    assert_eq!(info.entries, 4);
    assert_eq!(info.data_len, 50_000);
    assert_eq!(info.lob_version, 1);
    assert_eq!(info.creator_trx, TrxId(3));
    assert!(info.partially_updatable);
    assert_eq!(pager.live_pages(), 4);

    let report: LobReport = store.validate(&lob)?;
    assert_eq!(report.format, Some(LobFormat::Uncompressed));
    assert_eq!(report.live_entries, 4);
    assert_eq!(report.versions, 0);
    assert_eq!(report.data_len, 50_000);
    Ok(())
}

#[test]
fn reads_clamp_to_the_end_of_the_value() -> Result<()> {
    for format in [LobFormat::Uncompressed, LobFormat::Compressed] {
        let (_pager, store) = open(format, 4096)?;
        let value = text_bytes(30_000);
        let lob = store.insert(stamp(1), &value)?;
        assert_eq!(store.read(&lob, 10_000, 5_000)?, &value[10_000..15_000]);
        assert_eq!(store.read(&lob, 29_990, 100)?, &value[29_990..]);
        assert!(store.read(&lob, 30_000, 10)?.is_empty());
        assert!(store.read(&lob, 5, 0)?.is_empty());
        assert_eq!(store.read(&lob, 0, usize::MAX)?, value);
        assert_eq!(store.read(&lob, 29_990, usize::MAX)?, &value[29_990..]);
        assert!(store.read(&lob, u64::MAX, usize::MAX)?.is_empty());
    }
    Ok(())
}

#[test]
fn long_inserts_restart_at_the_log_margin() -> Result<()> {
    let value = random_bytes(21, 120_000);
    let mut batches = Vec::new();
    for margin in [None, Some(16 * 1024)] {
        let mut options = PagerOptions::default().with_page_size(4096);
        if let Some(bytes) = margin {
            options = options.with_log_margin(bytes);
        }
        let pager = Arc::new(Pager::new(options)?);
        let store = LobStore::new(
            pager.clone(),
            LobOptions::default().commit_frequency(1_000).validate(false),
        )?;
        let lob = store.insert(stamp(1), &value)?;
        assert_eq!(store.read(&lob, 0, value.len())?, value);
        batches.push(pager.redo().stats().batches_appended);
    }
    assert_eq!(batches[0], 1, "{batches:?}");
    assert!(batches[1] >= 5, "{batches:?}");
    Ok(())
}

#[test]
fn every_committed_page_carries_a_valid_checksum() -> Result<()> {
    for format in [LobFormat::Uncompressed, LobFormat::Compressed] {
        let (pager, store) = open(format, 4096)?;
        store.insert(stamp(1), &random_bytes(3, 40_000))?;
        store.insert(stamp(2), &text_bytes(40_000))?;
        let high_water = pager.stats().high_water;
        for page in 0..high_water {
            if pager.is_allocated(PageNo(page)) {
                pager.verify_page(PageNo(page))?;
            }
        }
    }
    Ok(())
}

#[test]
fn destroy_releases_every_page_and_is_idempotent() -> Result<()> {
    for format in [LobFormat::Uncompressed, LobFormat::Compressed] {
        let (pager, store) = open(format, 4096)?;
        let mut lob = store.insert(stamp(1), &random_bytes(11, 100_000))?;
        assert!(pager.live_pages() > 20);
        store.destroy(&mut lob)?;
        assert!(lob.is_null());
        assert_eq!(lob.length, 0);
        assert_eq!(pager.live_pages(), 0);
        store.destroy(&mut lob)?;
        assert_eq!(pager.live_pages(), 0);
        assert!(store.read(&lob, 0, 10)?.is_empty());
    }
    Ok(())
}

#[test]
fn inherited_references_never_free_pages() -> Result<()> {
    let (pager, store) = open(LobFormat::Uncompressed, 4096)?;
    let lob = store.insert(stamp(1), &random_bytes(5, 9_000))?;
    let live = pager.live_pages();
    let mut copy = lob.inherited_copy();
    store.destroy(&mut copy)?;
    assert_eq!(pager.live_pages(), live);
    assert_eq!(store.read(&lob, 0, 9_000)?, random_bytes(5, 9_000));
    Ok(())
}

#[test]
fn references_survive_encoding() -> Result<()> {
    let (_pager, store) = open(LobFormat::Compressed, 4096)?;
    let value = text_bytes(12_345);
    let lob = store.insert(stamp(9), &value)?;
    let decoded = sombra_lob::LobRef::decode(&lob.encode())?;
    assert_eq!(decoded, lob);
    assert_eq!(store.read(&decoded, 0, value.len())?, value);
    Ok(())
}

#[test]
fn foreign_tablespace_is_rejected() -> Result<()> {
    let (_pager, store) = open(LobFormat::Uncompressed, 4096)?;
    let mut lob = store.insert(stamp(1), b"abc")?;
    lob.space_id = sombra_lob::SpaceId(42);
    assert!(matches!(store.read(&lob, 0, 3), Err(LobError::Invalid(_))));
    Ok(())
}

#[test]
fn null_address_is_distinct_from_page_zero() {
    assert!(FilAddr::NULL.is_null());
    assert!(!PageNo(0).is_null());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn uncompressed_round_trip(value in proptest::collection::vec(any::<u8>(), 0..20_000)) {
        let (_pager, store) = open(LobFormat::Uncompressed, 4096).unwrap();
        let lob = store.insert(stamp(1), &value).unwrap();
        prop_assert_eq!(store.read(&lob, 0, value.len()).unwrap(), value);
    }

    #[test]
    fn compressed_round_trip(
        seed in any::<u64>(),
        len in 0usize..40_000,
        alphabet in 1u8..=255,
    ) {
        let (_pager, store) = open(LobFormat::Compressed, 4096).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let value: Vec<u8> = (0..len).map(|_| rng.gen_range(0..=alphabet)).collect();
        let lob = store.insert(stamp(1), &value).unwrap();
        prop_assert_eq!(store.read(&lob, 0, value.len()).unwrap(), value);
        store.validate(&lob).unwrap();
    }
}
