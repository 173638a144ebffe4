#![allow(missing_docs)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sombra_lob::{
    lob::zlob::{FragStats, ZFirstPage},
    primitives::mtr::Mtr,
    LobDiff, LobError, LobFormat, LobOptions, LobStore, Pager, PagerOptions, Result, Stamp,
    TrxId, UndoKind,
};

fn open(validate: bool) -> Result<(Arc<Pager>, LobStore)> {
    let pager = Arc::new(Pager::new(PagerOptions::default().with_page_size(4096))?);
    let options = LobOptions::default()
        .format(LobFormat::Compressed)
        .zlib_chunk_size(2048)
        .validate(validate);
    let store = LobStore::new(pager.clone(), options)?;
    Ok((pager, store))
}

fn text(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog; "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

#[test]
fn small_value_stays_inline() -> Result<()> {
    let (_pager, store) = open(true)?;
    let lob = store.insert(Stamp::new(TrxId(1), 1), &text(500))?;
    let info = store.get_info(&lob)?;
    assert_eq!(info.pages, 1);
    assert_eq!(info.entries, 1);
    let report = store.validate(&lob)?;
    assert_eq!(report.frag_pages, 0);
    assert_eq!(report.fragments, 0);
    Ok(())
}

#[test]
fn compressible_chunks_share_fragment_pages() -> Result<()> {
    let (_pager, store) = open(true)?;
    let lob = store.insert(Stamp::new(TrxId(1), 1), &text(40_000))?;
    let report = store.validate(&lob)?;
    assert_eq!(report.live_entries, 20);
    // Chunk 0 is inline, the other 19 streams are fragments.
    assert_eq!(report.fragments, 19);
    assert_eq!(report.frag_pages, 1);
    // First page, one overflow index page and the fragment page.
    assert_eq!(store.get_info(&lob)?.pages, 2 + report.frag_pages);
    Ok(())
}

#[test]
fn incompressible_chunks_use_data_pages() -> Result<()> {
    let (_pager, store) = open(true)?;
    let mut rng = StdRng::seed_from_u64(5);
    let value: Vec<u8> = (0..6 * 2048).map(|_| rng.gen()).collect();
    let lob = store.insert(Stamp::new(TrxId(1), 1), &value)?;
    let report = store.validate(&lob)?;
    assert_eq!(report.fragments, 0);
    assert_eq!(store.get_info(&lob)?.pages, 6);
    assert_eq!(store.read(&lob, 0, value.len())?, value);
    Ok(())
}

#[test]
fn fragments_are_conserved_through_update_and_purge() -> Result<()> {
    let (pager, store) = open(true)?;
    let mut model = text(40_000);
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &model)?;
    let mut rng = StdRng::seed_from_u64(17);

    for round in 0..40u32 {
        let modifier = Stamp::new(TrxId(2), round);
        let len = rng.gen_range(1..48);
        let offset = rng.gen_range(0..model.len() - len);
        let bytes: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect();
        store.update(&mut lob, modifier, &[LobDiff::new(offset as u64, bytes.clone())])?;
        model[offset..offset + len].copy_from_slice(&bytes);
        if round % 3 == 2 {
            store.purge(&mut lob, modifier, UndoKind::UpdateExisting, None)?;
        }

        let report = store.validate(&lob)?;
        let metrics = store.metrics();
        assert_eq!(
            metrics.fragments_allocated - metrics.fragments_freed,
            report.fragments as u64,
            "round {round}"
        );
    }
    assert_eq!(store.read(&lob, 0, model.len())?, model);

    store.destroy(&mut lob)?;
    assert_eq!(pager.live_pages(), 0);
    Ok(())
}

#[test]
fn stale_fragment_counters_are_refreshed() -> Result<()> {
    let (_pager, store) = open(false)?;
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &text(40_000))?;
    let first = ZFirstPage(lob.page_no);

    let mut mtr = Mtr::start(&**store.page_store());
    let fe = first.frag_entries(&mut mtr)?[0];
    let actual = fe.stats(&mut mtr)?;
    fe.set_stats(
        &mut mtr,
        FragStats {
            n_frags: actual.n_frags + 1,
            big_free_len: 4000,
            ..actual
        },
    )?;
    mtr.commit()?;
    assert!(matches!(store.validate(&lob), Err(LobError::Corruption(_))));

    let mut model = text(40_000);
    let extra = text(3_000);
    store.append(&mut lob, Stamp::new(TrxId(2), 1), &extra)?;
    model.extend_from_slice(&extra);

    assert!(store.metrics().frag_cache_refreshes >= 1);
    store.validate(&lob)?;
    assert_eq!(store.read(&lob, 0, model.len())?, model);
    Ok(())
}
