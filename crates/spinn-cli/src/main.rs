//! `spinn`: partitioning costs and routing table compression.
//!
//! ```text
//! USAGE:
//!   spinn cost --atoms N [options]       Split a population and cost each slice
//!   spinn compress --chips N [options]   Compress synthetic tables on a virtual machine
//! ```
//!
//! Logging follows `RUST_LOG` (default `warn`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spinn_chip::{ChipCoordinate, CoreLocation, MulticastRoutingTable, Route, RoutingEntry};
use spinn_compress::backends::VirtualMachine;
use spinn_compress::bitfield::BitField;
use spinn_compress::payload::{BitFieldRegion, KeyAtomMap};
use spinn_compress::{BitFieldRouterCompressor, CompressionConfig, Placement};
use spinn_partition::{
    Connector, CoreLimits, NeuronModel, PartitionConstraint, Population, Projection,
    SimulationParameters, StdpParameters, SynapseDynamics, VertexSplitter,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spinn", about = "Neuron partitioning and routing table compression", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Split a population onto cores and print the cost of every slice.
    Cost {
        /// Neurons in the population.
        #[arg(long)]
        atoms: u32,
        /// Upper bound on neurons per core.
        #[arg(long)]
        max_atoms: Option<u32>,
        /// Neurons in the pre-synaptic population.
        #[arg(long, default_value_t = 100)]
        pre_atoms: u32,
        /// all-to-all, one-to-one or fixed-probability:P.
        #[arg(long, default_value = "all-to-all", value_parser = parse_connector)]
        connector: Connector,
        /// Make the incoming synapses plastic (STDP).
        #[arg(long)]
        stdp: bool,
        /// Add structural plasticity with this many synapses per neuron.
        #[arg(long)]
        structural: Option<u32>,
    },
    /// Run the compression pipeline on a virtual machine.
    Compress {
        /// Chips, each with two bitfield-generating cores.
        #[arg(long, default_value_t = 4)]
        chips: u8,
        /// Extra routing entries per chip.
        #[arg(long, default_value_t = 64)]
        entries: u32,
        /// Refuse SDRAM allocation on chip X,Y (repeatable).
        #[arg(long, value_parser = parse_chip)]
        fail_malloc: Vec<ChipCoordinate>,
        /// Make the compressor fail on chip X,Y (repeatable).
        #[arg(long, value_parser = parse_chip)]
        fail_compressor: Vec<ChipCoordinate>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Cost {
            atoms,
            max_atoms,
            pre_atoms,
            connector,
            stdp,
            structural,
        } => {
            let dynamics = match (stdp, structural) {
                (_, Some(s_max)) => SynapseDynamics::Structural {
                    stdp: StdpParameters::default(),
                    s_max,
                },
                (true, None) => SynapseDynamics::Stdp(StdpParameters::default()),
                (false, None) => SynapseDynamics::Static,
            };
            let population = Population::new("population", atoms, NeuronModel::lif_curr_exp())
                .with_projection(Projection::new("input", pre_atoms, connector))
                .with_synapse_dynamics(dynamics);
            cmd_cost(population, max_atoms)?;
        }
        Cmd::Compress {
            chips,
            entries,
            fail_malloc,
            fail_compressor,
        } => cmd_compress(chips, entries, &fail_malloc, &fail_compressor)?,
    }

    Ok(())
}

fn parse_connector(s: &str) -> std::result::Result<Connector, String> {
    match s {
        "all-to-all" => Ok(Connector::AllToAll),
        "one-to-one" => Ok(Connector::OneToOne),
        _ => {
            let p = s
                .strip_prefix("fixed-probability:")
                .ok_or_else(|| format!("unknown connector '{s}'"))?;
            let probability: f64 = p.parse().map_err(|e| format!("probability '{p}': {e}"))?;
            if !(0.0..=1.0).contains(&probability) {
                return Err(format!("probability {probability} outside [0, 1]"));
            }
            Ok(Connector::FixedProbability { probability })
        }
    }
}

fn parse_chip(s: &str) -> std::result::Result<ChipCoordinate, String> {
    let (x, y) = s.split_once(',').ok_or_else(|| format!("expected X,Y, got '{s}'"))?;
    let x = x.trim().parse().map_err(|e| format!("x '{x}': {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("y '{y}': {e}"))?;
    Ok(ChipCoordinate::new(x, y))
}

fn cmd_cost(population: Population, max_atoms: Option<u32>) -> Result<()> {
    let sim = SimulationParameters::default();
    let limits = CoreLimits::for_simulation(&sim);
    let mut splitter = VertexSplitter::new(Arc::new(population), sim);
    if let Some(max) = max_atoms {
        splitter.add_constraint(PartitionConstraint::MaxAtomsPerCore(max));
    }
    let vertices = splitter.split(&limits).context("partitioning failed")?;

    println!(
        "{} atoms -> {} cores ({} timesteps)",
        vertices.iter().map(|v| v.slice().n_atoms()).sum::<u32>(),
        vertices.len(),
        sim.n_timesteps
    );
    println!("{:>5}  {:>14}  {:>10}  {:>10}  {:>8}  {:>10}", "core", "slice", "sdram", "per tick", "dtcm", "cycles");
    for v in &vertices {
        let r = v.resources();
        println!(
            "{:>5}  {:>14}  {:>10}  {:>10}  {:>8}  {:>10}",
            v.index(),
            v.slice().to_string(),
            r.sdram.fixed(),
            r.sdram.per_timestep(),
            r.dtcm_bytes,
            r.cpu_cycles
        );
    }
    let stats = splitter.cache_stats();
    println!(
        "cache: {} container builds, {} hits",
        stats.container_builds, stats.container_hits
    );
    Ok(())
}

const SOURCE_KEY: u32 = 0x1000;
const SOURCE_ATOMS: u32 = 64;
const MATRIX_BYTES: u32 = 16 * 1024;

fn cmd_compress(
    n_chips: u8,
    extra_entries: u32,
    fail_malloc: &[ChipCoordinate],
    fail_compressor: &[ChipCoordinate],
) -> Result<()> {
    if n_chips == 0 {
        bail!("--chips must be at least 1");
    }
    let sim = SimulationParameters::default();
    let vm = VirtualMachine::new();
    info!("Virtual machine with {} chips, {} extra entries each", n_chips, extra_entries);

    let population = Population::new("pop", 64 * u32::from(n_chips), NeuronModel::lif_curr_exp())
        .with_projection(Projection::new("source", SOURCE_ATOMS, Connector::AllToAll));
    let vertices = VertexSplitter::new(Arc::new(population), sim)
        .with_constraint(PartitionConstraint::FixedAtomsPerCore(32))
        .split(&CoreLimits::for_simulation(&sim))
        .context("partitioning failed")?;

    let placements: Vec<Placement> = vertices
        .into_iter()
        .enumerate()
        .map(|(i, mut vertex)| {
            let core = CoreLocation::new((i / 2) as u8, 0, 1 + (i % 2) as u8);
            // odd cores want even source atoms, even cores the odd ones
            let parity = u32::from(core.p - 1) % 2;
            let region = BitFieldRegion {
                filters: vec![BitField::from_fn(SOURCE_KEY, SOURCE_ATOMS, |a| a % 2 == parity)],
            };
            let keys = KeyAtomMap {
                pairs: vec![(SOURCE_KEY, SOURCE_ATOMS)],
            };
            vm.write_population_core(core, &region, &keys, MATRIX_BYTES);
            vertex.set_on_chip_generatable_area(0, MATRIX_BYTES);
            Placement::new(Arc::new(vertex), core)
        })
        .collect();

    let tables: Vec<MulticastRoutingTable> = (0..n_chips)
        .map(|x| {
            let chip = ChipCoordinate::new(x, 0);
            let mut entries = vec![RoutingEntry::new(
                SOURCE_KEY,
                !(SOURCE_ATOMS - 1),
                Route::new(&[], &[1, 2]),
            )];
            entries.extend((0..extra_entries).map(|k| {
                RoutingEntry::new(0x10_0000 + k, u32::MAX, Route::new(&[((k / 16) % 6) as u8], &[]))
            }));
            MulticastRoutingTable::new(chip, entries)
        })
        .collect();

    for &chip in fail_malloc {
        vm.fail_malloc_on(chip);
    }
    for &chip in fail_compressor {
        vm.fail_compressor_on(chip);
    }

    let config = CompressionConfig::for_simulation(&sim);
    let result = BitFieldRouterCompressor::new(config).run(&tables, &placements, &vm, &vm);

    for table in &tables {
        let installed = vm
            .installed_table(table.chip)
            .map_or_else(|| "-".to_string(), |t| t.len().to_string());
        println!("{}  {:>5} entries -> {:>5}", table.chip, table.len(), installed);
    }

    let report = result.context("compression failed")?;
    for (chip, state) in &report.states {
        println!("{chip}: {state}");
    }
    if let Some(e) = &report.expander_failure {
        println!("warning: {e}");
    }
    Ok(())
}
