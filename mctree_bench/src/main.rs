//! Annealing driver: load or generate a prefix table, insert it, run the
//! local search and report progress.
//!
//! ```text
//! mctree_bench --sequential-24 4096 --iter 200000 --print 20000 --validate 50000
//! mctree_bench --prefixes routes.txt --iter 1000000 --add-del 10 --save-tree t.bin
//! ```

use clap::Parser;
use ipnet::{IpNet, Ipv4Net};
use log::info;
use mctree_core::helpers::prefix_key;
use mctree_core::{Config, Key, McTree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Parser)]
#[command(name = "mctree_bench")]
#[command(about = "Build a masked-key classification tree over a prefix table and anneal it", long_about = None)]
struct Args {
    /// Prefix table: one CIDR per line, `#` starts a comment
    #[arg(long, conflicts_with = "sequential_24")]
    prefixes: Option<PathBuf>,

    /// Generate this many sequential 10.X.Y.0/24 routes instead of reading a table
    #[arg(long = "sequential-24", default_value_t = 0)]
    sequential_24: u32,

    /// RNG seed (default: process id)
    #[arg(long)]
    seed: Option<u64>,

    /// Number of search steps
    #[arg(long, default_value_t = 1)]
    iter: u64,

    /// Steps between validations (0 disables)
    #[arg(long, default_value_t = 0)]
    validate: u64,

    /// Steps between progress reports (0 disables)
    #[arg(long, default_value_t = 0)]
    print: u64,

    /// Steps between random route toggles (0 disables)
    #[arg(long = "add-del", default_value_t = 0)]
    add_del: u64,

    /// Also dump every leaf with each report
    #[arg(short, long)]
    verbose: bool,

    /// Restart the search after this many steps without improvement (0 = never)
    #[arg(long, default_value_t = 0)]
    restart: u64,

    #[arg(long = "max-leaves", default_value_t = 16 << 10)]
    max_leaves: usize,

    /// Smallest leaf the search will try to split
    #[arg(long = "min-pairs", default_value_t = 4)]
    min_pairs: usize,

    #[arg(long, default_value_t = 1e-6)]
    temperature: f64,

    /// Topology to start from
    #[arg(long = "load-tree")]
    load_tree: Option<PathBuf>,

    /// Where to save the final topology
    #[arg(long = "save-tree")]
    save_tree: Option<PathBuf>,
}

struct Route {
    key: Key,
    present: bool,
}

fn read_prefixes(path: &Path) -> Result<Vec<IpNet>, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    let mut nets = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let net: IpNet = line
            .parse()
            .map_err(|e| format!("{}:{}: {line:?}: {e}", path.display(), n + 1))?;
        nets.push(net);
    }
    Ok(nets)
}

fn sequential_24(n: u32) -> Result<Vec<IpNet>, ipnet::PrefixLenError> {
    let base = u32::from(Ipv4Addr::new(10, 0, 0, 0));
    (0..n)
        .map(|i| {
            let addr = Ipv4Addr::from(base.wrapping_add(i << 8));
            Ipv4Net::new(addr, 24).map(IpNet::V4)
        })
        .collect()
}

fn report(t: &McTree, iteration: u64, start: Instant, verbose: bool) {
    println!("iteration {iteration:8}: elapsed time {:.3?}", start.elapsed());
    print!("{}", t.print_stats());
    if verbose {
        print!("{}", t.dump());
    }
}

fn validate(t: &McTree, iteration: u64) -> Result<(), Box<dyn Error>> {
    t.validate()
        .map_err(|e| format!("validate fails iter {iteration}: {e}").into())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::builder().format_timestamp(None).init();
    let args = Args::parse();

    let nets = match (&args.prefixes, args.sequential_24) {
        (Some(path), _) => read_prefixes(path)?,
        (None, n) if n > 0 => sequential_24(n)?,
        _ => return Err("no input: pass --prefixes or --sequential-24".into()),
    };
    let key_bits = if nets.iter().any(|n| matches!(n, IpNet::V6(_))) { 128 } else { 32 };

    let seed = args.seed.unwrap_or_else(|| std::process::id() as u64);
    println!("seed: {seed}");
    let mut t = McTree::new(Config {
        key_bits,
        max_leaves: args.max_leaves,
        min_pairs_for_split: args.min_pairs,
        restart_after_steps: args.restart,
        validate_interval: 0,
        temperature: args.temperature,
        seed: Some(seed),
    })?;
    if let Some(path) = &args.load_tree {
        t.restore(path)?;
    }

    let n_words = t.config().words_per_key();
    let mut routes = Vec::with_capacity(nets.len());
    for net in nets.iter().filter(|n| n.prefix_len() > 0) {
        let key = prefix_key(net, n_words).ok_or_else(|| format!("{net} does not fit the key"))?;
        t.add(&key)?;
        routes.push(Route { key, present: true });
    }
    info!("inserted {} routes, {} distinct keys", routes.len(), t.key_count());

    if args.validate != 0 {
        validate(&t, 0)?;
    }
    let start = Instant::now();
    report(&t, 0, start, args.verbose);

    let mut rng = StdRng::seed_from_u64(seed.rotate_left(32));
    for i in 0..args.iter {
        if args.print != 0 && i % args.print == 0 {
            report(&t, i, start, args.verbose);
        }

        t.step();

        let validate_now = args.validate != 0 && i % args.validate == 0;
        if validate_now {
            validate(&t, i)?;
        }

        if args.add_del != 0 && i % args.add_del == 0 && !routes.is_empty() {
            let idx = rng.random_range(0..routes.len());
            let r = &mut routes[idx];
            if r.present {
                t.delete(&r.key)?;
            } else {
                t.add(&r.key)?;
            }
            r.present = !r.present;
            if validate_now {
                validate(&t, i)?;
            }
        }
    }

    report(&t, args.iter, start, args.verbose);
    t.report_metrics();

    if let Some(path) = &args.save_tree {
        t.save(path)?;
    }
    Ok(())
}
