use std::io::stdout;
use std::path::PathBuf;

use gfa::{gfa::GFA, parser::GFAParser};
use log::info;
use structopt::StructOpt;

use awa::bidirected::VariationGraph;
use awa::cycle_equiv::{decompose, edge_classes};

#[derive(StructOpt, Debug)]
#[structopt(name = "awa", about = "cycle-equivalence decomposition of a GFA graph")]
struct Opt {
    /// Input graph in GFA 1.0 format
    in_gfa: PathBuf,

    /// Print DOT renderings of each component's spanning tree
    #[structopt(long)]
    dot: bool,

    /// Validate path steps against the graph's edges before decomposing
    #[structopt(long)]
    validate: bool,

    /// Number of worker threads for per-component runs (defaults to one
    /// per core)
    #[structopt(short = "t", long)]
    threads: Option<usize>,

    /// Verbosity (-v, -vv, ...)
    #[structopt(short, parse(from_occurrences))]
    verbose: u8,
}

fn run(opt: &Opt) -> awa::Result<()> {
    if let Some(threads) = opt.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| awa::AwaError::InvalidInput(format!("thread pool: {}", e)))?;
    }

    println!(" --- Loading graph --- ");
    let parser: GFAParser<usize, ()> = GFAParser::new();
    let gfa: GFA<usize, ()> = parser
        .parse_file(&opt.in_gfa)
        .map_err(|e| awa::AwaError::InvalidGraph(format!("{}", e)))?;

    let graph = VariationGraph::from_gfa(&gfa)?;
    info!(
        "loaded {} vertices, {} edges, {} paths",
        graph.size(),
        graph.edge_count(),
        graph.path_count()
    );

    if opt.validate {
        println!(" --- Validating paths --- ");
        graph.validate_paths()?;
    }

    println!(" --- Decomposing --- ");
    let components = decompose(&graph)?;

    for (i, comp) in components.iter().enumerate() {
        println!(
            "component {}: {} vertices, {} classes",
            i,
            comp.graph.size(),
            comp.report.class_count
        );

        for ec in edge_classes(&comp.tree) {
            match ec.graph_edge {
                Some(g_idx) => println!(
                    "\tedge {}\t{}\tclass {}",
                    ec.edge_id,
                    comp.graph.edge(g_idx),
                    ec.class
                ),
                None => println!("\tedge {}\t(synthesized)\tclass {}", ec.edge_id, ec.class),
            }
        }

        let hairpins = comp
            .report
            .opened_hairpin
            .iter()
            .enumerate()
            .filter(|(_, &open)| open)
            .map(|(v, _)| comp.tree.vertex(v).name().to_string())
            .collect::<Vec<_>>();
        if !hairpins.is_empty() {
            println!("\thairpin boundaries at: {}", hairpins.join(", "));
        }

        if opt.dot {
            comp.tree
                .output_dot(stdout())
                .map_err(|e| awa::AwaError::InvalidGraph(format!("dot output: {}", e)))?;
        }
    }

    Ok(())
}

fn main() {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::builder().filter_level(level).init();

    if let Err(e) = run(&opt) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
