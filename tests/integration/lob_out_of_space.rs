#![allow(missing_docs)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sombra_lob::{
    LobError, LobFormat, LobOptions, LobRef, LobStore, PageStore, Pager, PagerOptions, Result, Stamp,
    TrxId, UndoKind,
};

fn open(format: LobFormat, chunk: usize, max_pages: u32) -> Result<(Arc<Pager>, LobStore)> {
    let pager = Arc::new(Pager::new(
        PagerOptions::default()
            .with_page_size(4096)
            .with_max_pages(max_pages),
    )?);
    let options = LobOptions::default()
        .format(format)
        .zlib_chunk_size(chunk)
        .validate(true);
    let store = LobStore::new(pager.clone(), options)?;
    Ok((pager, store))
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn text(len: usize) -> Vec<u8> {
    b"pages run out at awkward moments; "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Inserts `value` with every page budget up to `max`, checking that a
/// failed insert leaves no page behind and a successful one reads back.
fn sweep_insert(format: LobFormat, chunk: usize, value: &[u8], max: u32) -> Result<()> {
    let mut failures = 0;
    for max_pages in 1..=max {
        let (pager, store) = open(format, chunk, max_pages)?;
        match store.insert(Stamp::new(TrxId(1), 1), value) {
            Ok(lob) => {
                assert_eq!(store.read(&lob, 0, value.len())?, value, "{format:?} max {max_pages}");
                store.validate(&lob)?;
            }
            Err(LobError::OutOfSpace) => {
                failures += 1;
                assert_eq!(pager.live_pages(), 0, "{format:?} leaked at max {max_pages}");
            }
            Err(err) => return Err(err),
        }
    }
    assert!(failures > 0, "{format:?} never ran out of space");
    Ok(())
}

#[test]
fn failed_uncompressed_inserts_leave_no_pages() -> Result<()> {
    // Sixteen entries, so the index grows past the embedded slots.
    sweep_insert(LobFormat::Uncompressed, 16 * 1024, &random_bytes(1, 60_000), 24)
}

#[test]
fn failed_compressed_stream_inserts_leave_no_pages() -> Result<()> {
    sweep_insert(LobFormat::Compressed, 16 * 1024, &random_bytes(2, 60_000), 24)
}

#[test]
fn failed_compressed_fragment_inserts_leave_no_pages() -> Result<()> {
    sweep_insert(LobFormat::Compressed, 2048, &text(60_000), 12)
}

#[test]
fn store_stays_usable_after_running_out() -> Result<()> {
    for format in [LobFormat::Uncompressed, LobFormat::Compressed] {
        let (pager, store) = open(format, 4096, 6)?;
        let err = store
            .insert(Stamp::new(TrxId(1), 1), &random_bytes(3, 40_000))
            .unwrap_err();
        assert!(matches!(err, LobError::OutOfSpace), "{err}");
        assert_eq!(pager.live_pages(), 0);
        let lob = store.insert(Stamp::new(TrxId(1), 2), b"fits on one page")?;
        assert_eq!(store.read(&lob, 0, 64)?, b"fits on one page");
    }
    Ok(())
}

/// Replaces the whole value with every page budget between the size of the
/// original and twice that, rolling back the failures.
fn sweep_replace(format: LobFormat, chunk: usize) -> Result<()> {
    let original = random_bytes(4, 30_000);
    let fresh = random_bytes(5, 30_000);
    let needed = {
        let (pager, store) = open(format, chunk, u32::MAX)?;
        store.insert(Stamp::new(TrxId(1), 1), &original)?;
        pager.stats().high_water
    };

    let mut failures = 0;
    for max_pages in needed..=needed * 2 + 2 {
        let (pager, store) = open(format, chunk, max_pages)?;
        let mut lob: LobRef = store.insert(Stamp::new(TrxId(1), 1), &original)?;
        let modifier = Stamp::new(TrxId(2), 1);
        match store.replace(&mut lob, modifier, 0, &fresh) {
            Ok(_) => assert_eq!(store.read(&lob, 0, fresh.len())?, fresh),
            Err(LobError::OutOfSpace) => {
                failures += 1;
                store.rollback(&mut lob, modifier.trx, modifier.undo, UndoKind::UpdateExisting, None)?;
                assert_eq!(
                    store.read(&lob, 0, original.len())?,
                    original,
                    "{format:?} max {max_pages}"
                );
                store.validate(&lob)?;
            }
            Err(err) => return Err(err),
        }
        store.destroy(&mut lob)?;
        assert_eq!(pager.live_pages(), 0, "{format:?} leaked at max {max_pages}");
    }
    assert!(failures > 0, "{format:?} never ran out of space");
    Ok(())
}

#[test]
fn failed_uncompressed_replace_rolls_back_without_leaks() -> Result<()> {
    sweep_replace(LobFormat::Uncompressed, 4096)
}

#[test]
fn failed_compressed_replace_rolls_back_without_leaks() -> Result<()> {
    sweep_replace(LobFormat::Compressed, 4096)
}
