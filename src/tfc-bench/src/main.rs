use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use hdrhistogram::Histogram;
use minstant::Instant;

use tfc::logging;
use tfc::{Config, Dir, SimpleCodec, TableModel, Tfc, TfcBatch};

pub use tfc::tracing;
pub use tfc::tracing as log;

#[derive(Debug, Clone, Parser)]
#[command(name = "Table scope loopback benchmark")]
struct Opts {
    /// Config path; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    no_ansi: bool,
    /// Total number of iterations.
    #[arg(short, long, default_value_t = 16384)]
    total_iters: usize,
    /// Commands per batch, at most 64.
    #[arg(short, long, default_value_t = 32)]
    batch: usize,
    /// Action size in bytes.
    #[arg(long, default_value_t = 64)]
    act_size: usize,
}

fn report(name: &str, dura: Duration, ops: usize, hist: &Histogram<u64>) {
    log::info!(
        "{}: {} ops in {:?}, rate: {:.5} Mops",
        name,
        ops,
        dura,
        1e-6 * ops as f64 / dura.as_secs_f64(),
    );
    log::info!(
        "{}: avg: {:?}, min: {:?}, median: {:?}, p95: {:?}, p99: {:?}, max: {:?}",
        name,
        Duration::from_nanos(hist.mean() as u64),
        Duration::from_nanos(hist.min()),
        Duration::from_nanos(hist.value_at_percentile(50.0)),
        Duration::from_nanos(hist.value_at_percentile(95.0)),
        Duration::from_nanos(hist.value_at_percentile(99.0)),
        Duration::from_nanos(hist.max()),
    );
}

fn bench_sync(tfc: &mut Tfc, opts: &Opts) -> Result<()> {
    let mut hist = Histogram::<u64>::new_with_max(60_000_000_000, 5)?;
    let words = (opts.act_size + 31) / 32;
    let handle = tfc.act_alloc(Dir::Tx, words as u32)?;
    let data = vec![0xa5u8; opts.act_size];

    let start = Instant::now();
    for _ in 0..opts.total_iters {
        let ts = Instant::now();
        tfc.act_set(None, Dir::Tx, handle, &data)?;
        tfc.act_get(None, Dir::Tx, handle, words as u16, false)?;
        hist.record(ts.elapsed().as_nanos() as u64)?;
    }
    report("act set+get", start.elapsed(), opts.total_iters, &hist);
    tfc.act_free(Dir::Tx, handle)?;
    Ok(())
}

fn bench_em(tfc: &mut Tfc, opts: &Opts) -> Result<()> {
    let mut hist = Histogram::<u64>::new_with_max(60_000_000_000, 5)?;
    let start = Instant::now();
    for i in 0..opts.total_iters {
        let key = (i as u64).to_le_bytes();
        let ts = Instant::now();
        let flow = tfc
            .em_insert(None, Dir::Rx, &key)?
            .done()
            .ok_or_else(|| anyhow::anyhow!("insert was queued"))?;
        tfc.em_delete(None, Dir::Rx, flow)?;
        hist.record(ts.elapsed().as_nanos() as u64)?;
    }
    report("em insert+delete", start.elapsed(), opts.total_iters, &hist);
    Ok(())
}

fn bench_batch(tfc: &mut Tfc, opts: &Opts) -> Result<()> {
    let mut hist = Histogram::<u64>::new_with_max(60_000_000_000, 5)?;
    let batch_size = opts.batch.clamp(1, mpc::BATCH_MAX);
    let words = (opts.act_size + 31) / 32;
    let handle = tfc.act_alloc(Dir::Rx, words as u32)?;
    let data = vec![0x5au8; opts.act_size];
    let mut batch = TfcBatch::new();
    let mut failed = 0;

    let rounds = (opts.total_iters + batch_size - 1) / batch_size;
    let start = Instant::now();
    for _ in 0..rounds {
        let ts = Instant::now();
        tfc.batch_start(&mut batch)?;
        for _ in 0..batch_size {
            tfc.act_set(Some(&mut batch), Dir::Rx, handle, &data)?;
        }
        failed += tfc
            .batch_end(&mut batch)?
            .iter()
            .filter(|r| r.is_err())
            .count();
        hist.record(ts.elapsed().as_nanos() as u64)?;
    }
    report("batched act set", start.elapsed(), rounds * batch_size, &hist);
    if failed > 0 {
        log::warn!("{} batched commands failed", failed);
    }
    tfc.act_free(Dir::Rx, handle)?;
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    let config = match &opts.config {
        Some(path) => Config::from_path(path)?,
        None => Config::new(None)?,
    };

    // TFC_LOG overrides the configured level
    logging::init_log(&config, !opts.no_ansi)?;
    log::info!("opts: {:?}", opts);

    let model = TableModel::default();
    let mut tfc = Tfc::open(&config, Arc::new(model.device()), SimpleCodec)?;

    bench_sync(&mut tfc, &opts)?;
    bench_em(&mut tfc, &opts)?;
    bench_batch(&mut tfc, &opts)?;

    tfc.close();
    Ok(())
}
