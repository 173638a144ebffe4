#![allow(missing_docs)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sombra_lob::{
    primitives::mtr::Mtr, LobDiff, LobError, LobFormat, LobOptions, LobStore, Pager, PagerOptions,
    ReadContext, Result, Stamp, TrxId, UndoKind,
};

fn open(format: LobFormat) -> Result<(Arc<Pager>, LobStore)> {
    let pager = Arc::new(Pager::new(PagerOptions::default().with_page_size(4096))?);
    let options = LobOptions::default()
        .format(format)
        .zlib_chunk_size(4 * 1024)
        .validate(true);
    let store = LobStore::new(pager.clone(), options)?;
    Ok((pager, store))
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn patched(base: &[u8], offset: usize, bytes: &[u8]) -> Vec<u8> {
    let mut out = base.to_vec();
    out[offset..offset + bytes.len()].copy_from_slice(bytes);
    out
}

const FORMATS: [LobFormat; 2] = [LobFormat::Uncompressed, LobFormat::Compressed];

#[test]
fn lob_version_grows_with_every_copy_on_write() -> Result<()> {
    for format in FORMATS {
        let (_pager, store) = open(format)?;
        let mut lob = store.insert(Stamp::new(TrxId(1), 1), &random_bytes(1, 15_000))?;
        let mut last = store.get_info(&lob)?.lob_version;
        assert_eq!(last, 1);
        for undo in 0..8u32 {
            let diff = LobDiff::new(undo as u64 * 1_000, vec![undo as u8; 300]);
            let outcome = store.update(&mut lob, Stamp::new(TrxId(2), undo), &[diff])?;
            let info = store.get_info(&lob)?;
            assert_eq!(outcome.lob_version, info.lob_version);
            assert!(info.lob_version > last, "{format:?}");
            last = info.lob_version;
        }
    }
    Ok(())
}

#[test]
fn readers_bound_to_old_versions_see_old_bytes() -> Result<()> {
    for format in FORMATS {
        let (_pager, store) = open(format)?;
        let v1 = random_bytes(2, 12_000);
        let mut lob = store.insert(Stamp::new(TrxId(1), 1), &v1)?;
        let v2 = patched(&v1, 4_500, &[1u8; 400]);
        store.replace(&mut lob, Stamp::new(TrxId(2), 1), 4_500, &[1u8; 400])?;
        let v3 = patched(&v2, 4_600, &[2u8; 400]);
        store.replace(&mut lob, Stamp::new(TrxId(3), 1), 4_600, &[2u8; 400])?;

        assert_eq!(store.read_at(&lob, ReadContext::at(1), 0, 12_000)?, v1);
        assert_eq!(store.read_at(&lob, ReadContext::at(2), 0, 12_000)?, v2);
        assert_eq!(store.read_at(&lob, ReadContext::at(3), 0, 12_000)?, v3);
        assert_eq!(store.read(&lob, 0, 12_000)?, v3, "{format:?}");
    }
    Ok(())
}

#[test]
fn rollback_unwinds_to_the_savepoint_and_is_idempotent() -> Result<()> {
    for format in FORMATS {
        let (pager, store) = open(format)?;
        let original = random_bytes(3, 20_000);
        let mut lob = store.insert(Stamp::new(TrxId(1), 1), &original)?;
        let baseline = pager.live_pages();

        store.replace(&mut lob, Stamp::new(TrxId(7), 3), 5_000, &[9u8; 500])?;
        let after_first = patched(&original, 5_000, &[9u8; 500]);
        store.replace(&mut lob, Stamp::new(TrxId(7), 4), 5_100, &[8u8; 500])?;

        let undone = store.rollback(&mut lob, TrxId(7), 4, UndoKind::UpdateExisting, None)?;
        assert_eq!(undone, 1, "{format:?}");
        assert_eq!(lob.length, 20_000);
        assert_eq!(store.read(&lob, 0, 30_000)?, after_first);

        let undone = store.rollback(&mut lob, TrxId(7), 3, UndoKind::UpdateExisting, None)?;
        assert_eq!(undone, 1);
        assert_eq!(store.read(&lob, 0, 30_000)?, original);
        assert_eq!(pager.live_pages(), baseline, "{format:?}");

        assert_eq!(
            store.rollback(&mut lob, TrxId(7), 3, UndoKind::UpdateExisting, None)?,
            0
        );
        assert_eq!(store.read(&lob, 0, 30_000)?, original);
        assert_eq!(store.metrics().entries_rolled_back, 2);
    }
    Ok(())
}

#[test]
fn rollback_and_undo_records_together_revert_an_append() -> Result<()> {
    let (pager, store) = open(LobFormat::Uncompressed)?;
    let original = random_bytes(11, 20_000);
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &original)?;
    let baseline = pager.live_pages();

    // The tail of the last data page grows in place, the rest goes to new pages.
    let outcome = store.append(&mut lob, Stamp::new(TrxId(7), 5), &random_bytes(12, 9_000))?;
    assert_eq!(outcome.undo.len(), 1);
    assert_eq!(lob.length, 29_000);

    assert_eq!(store.rollback(&mut lob, TrxId(7), 5, UndoKind::UpdateExisting, None)?, 2);
    assert_eq!(pager.live_pages(), baseline);
    store.apply_undolog(&mut lob, &outcome.undo)?;
    assert_eq!(lob.length, 20_000);
    assert_eq!(store.read(&lob, 0, 30_000)?, original);
    Ok(())
}

#[test]
fn rollback_of_other_transactions_changes_nothing() -> Result<()> {
    let (_pager, store) = open(LobFormat::Uncompressed)?;
    let original = random_bytes(5, 8_000);
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &original)?;
    store.replace(&mut lob, Stamp::new(TrxId(2), 1), 0, &[0u8; 200])?;
    assert_eq!(store.rollback(&mut lob, TrxId(3), 0, UndoKind::UpdateExisting, None)?, 0);
    assert_eq!(store.read(&lob, 0, 200)?, vec![0u8; 200]);
    Ok(())
}

#[test]
fn rolling_back_the_insert_destroys_the_lob() -> Result<()> {
    for format in FORMATS {
        let (pager, store) = open(format)?;
        let mut lob = store.insert(Stamp::new(TrxId(4), 1), &random_bytes(6, 30_000))?;
        store.rollback(&mut lob, TrxId(4), 1, UndoKind::Insert, None)?;
        assert!(lob.is_null());
        assert_eq!(pager.live_pages(), 0);
        assert_eq!(store.rollback(&mut lob, TrxId(4), 1, UndoKind::Insert, None)?, 0);
    }
    Ok(())
}

#[test]
fn purge_drops_history_and_reads_fall_back_to_newest() -> Result<()> {
    for format in FORMATS {
        let (pager, store) = open(format)?;
        let original = random_bytes(7, 16_000);
        let mut lob = store.insert(Stamp::new(TrxId(1), 1), &original)?;
        let modifier = Stamp::new(TrxId(2), 6);
        store.replace(&mut lob, modifier, 9_000, &[5u8; 1_000])?;
        let current = patched(&original, 9_000, &[5u8; 1_000]);
        let before = pager.live_pages();
        assert!(store.validate(&lob)?.versions >= 1);

        let purged = store.purge(&mut lob, modifier, UndoKind::UpdateExisting, None)?;
        assert!(purged >= 1);
        assert!(pager.live_pages() < before, "{format:?}");
        assert_eq!(store.validate(&lob)?.versions, 0);
        assert_eq!(store.purge(&mut lob, modifier, UndoKind::UpdateExisting, None)?, 0);

        // No image with version 1 is left; the newest one is served.
        assert_eq!(store.read_at(&lob, ReadContext::at(1), 0, 16_000)?, current);
        assert_eq!(store.metrics().versions_purged, purged as u64);
    }
    Ok(())
}

#[test]
fn purge_of_delete_marked_record_frees_everything() -> Result<()> {
    for format in FORMATS {
        let (pager, store) = open(format)?;
        let mut lob = store.insert(Stamp::new(TrxId(1), 1), &random_bytes(8, 25_000))?;
        let modifier = Stamp::new(TrxId(3), 2);
        store.replace(&mut lob, modifier, 100, &[1u8; 2_000])?;
        store.purge(&mut lob, modifier, UndoKind::DeleteMarked, None)?;
        assert!(lob.is_null());
        assert_eq!(pager.live_pages(), 0, "{format:?}");
        assert_eq!(store.purge(&mut lob, modifier, UndoKind::DeleteMarked, None)?, 0);
    }
    Ok(())
}

#[test]
fn purge_of_an_insert_undo_keeps_the_lob() -> Result<()> {
    let (pager, store) = open(LobFormat::Uncompressed)?;
    let value = random_bytes(9, 5_000);
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &value)?;
    let live = pager.live_pages();
    assert_eq!(store.purge(&mut lob, Stamp::new(TrxId(1), 1), UndoKind::Insert, None)?, 0);
    assert_eq!(pager.live_pages(), live);
    assert_eq!(store.read(&lob, 0, 5_000)?, value);
    Ok(())
}

#[test]
fn nested_maintenance_respects_the_outer_scope() -> Result<()> {
    let (pager, store) = open(LobFormat::Uncompressed)?;
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &random_bytes(10, 6_000))?;
    let other = store.insert(Stamp::new(TrxId(1), 2), b"neighbour")?;
    store.replace(&mut lob, Stamp::new(TrxId(2), 1), 0, &[1u8; 10])?;

    let mut outer = Mtr::start(&*pager);
    outer.s_latch(other.page_no)?;
    assert_eq!(
        store.rollback(&mut lob, TrxId(2), 0, UndoKind::UpdateExisting, Some(&outer))?,
        1
    );
    outer.commit()?;

    store.replace(&mut lob, Stamp::new(TrxId(3), 1), 0, &[2u8; 10])?;
    let mut outer = Mtr::start(&*pager);
    outer.x_latch(lob.page_no)?;
    let err = store
        .rollback(&mut lob, TrxId(3), 0, UndoKind::UpdateExisting, Some(&outer))
        .unwrap_err();
    assert!(matches!(err, LobError::Invalid(_)));
    outer.commit()?;
    assert_eq!(store.read(&lob, 0, 10)?, vec![2u8; 10]);
    Ok(())
}
