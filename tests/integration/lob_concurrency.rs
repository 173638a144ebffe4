#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use sombra_lob::{
    LobFormat, LobOptions, LobStore, PageStore, Pager, PagerOptions, ReadContext, Result, Stamp,
    TrxId,
};
use tracing_subscriber::EnvFilter;

const LEN: usize = 12_000;
const ROUNDS: u8 = 40;

fn open(format: LobFormat) -> Result<LobStore> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let pager = Arc::new(Pager::new(PagerOptions::default().with_page_size(4096))?);
    let options = LobOptions::default()
        .format(format)
        .zlib_chunk_size(4 * 1024)
        .commit_frequency(64)
        .validate(true);
    LobStore::new(pager, options)
}

#[test]
fn readers_never_observe_a_torn_value() -> Result<()> {
    for format in [LobFormat::Uncompressed, LobFormat::Compressed] {
        let store = open(format)?;
        let mut lob = store.insert(Stamp::new(TrxId(1), 1), &[0xFF; LEN])?;
        let reference = lob;
        let done = AtomicBool::new(false);

        thread::scope(|s| -> Result<()> {
            let mut readers = Vec::new();
            for _ in 0..3 {
                readers.push(s.spawn(|| -> Result<u32> {
                    let mut reads = 0;
                    while !done.load(Ordering::Acquire) {
                        let latest = store.read(&reference, 0, LEN)?;
                        assert_eq!(latest.len(), LEN);
                        assert!(latest.iter().all(|b| *b == latest[0]), "torn read");

                        let oldest = store.read_at(&reference, ReadContext::at(1), 0, LEN)?;
                        assert!(oldest.iter().all(|b| *b == 0xFF));
                        reads += 1;
                    }
                    Ok(reads)
                }));
            }

            for round in 0..ROUNDS {
                let stamp = Stamp::new(TrxId(2), round as u32);
                store.replace(&mut lob, stamp, 0, &[round; LEN])?;
            }
            done.store(true, Ordering::Release);
            for reader in readers {
                reader.join().expect("reader panicked")?;
            }
            Ok(())
        })?;

        assert_eq!(store.read(&lob, 0, LEN)?, vec![ROUNDS - 1; LEN]);
        assert_eq!(store.get_info(&lob)?.lob_version, ROUNDS as u32 + 1);
    }
    Ok(())
}

#[test]
fn independent_lobs_are_written_in_parallel() -> Result<()> {
    let store = open(LobFormat::Compressed)?;
    thread::scope(|s| {
        let workers: Vec<_> = (0..4u64)
            .map(|trx| {
                let store = store.clone();
                s.spawn(move || -> Result<()> {
                    let value: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8 ^ trx as u8).collect();
                    let mut lob = store.insert(Stamp::new(TrxId(trx + 1), 1), &value)?;
                    store.append(&mut lob, Stamp::new(TrxId(trx + 1), 2), &value)?;
                    let read = store.read(&lob, 0, 40_000)?;
                    assert_eq!(&read[..20_000], &value[..]);
                    assert_eq!(&read[20_000..], &value[..]);
                    store.destroy(&mut lob)?;
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked")?;
        }
        Ok::<(), sombra_lob::LobError>(())
    })?;
    assert_eq!(store.page_store().stats().live_pages, 0);
    Ok(())
}
