use anyhow::{Context, Result, bail};
use std::path::Path;
use vmsim_mm::allocator::ReservationThpAllocator;
use vmsim_mm::memory::MemoryModel;
use vmsim_mm::os::ProcessMemory;
use vmsim_mm::walker::WalkerPool;
use vmsim_mm::{Addr, Mmu, MmuDesign, SimClock, SimConfig};

use crate::cli::{Cli, Cmd, RunArgs};
use crate::logger;
use crate::report::RunReport;
use crate::workload::Workload;

pub fn run(cli: Cli) -> Result<()> {
    logger::init(cli.verbose);

    match cli.cmd {
        Cmd::Run(args) => {
            let config = load_config(args.config.as_deref())?;
            let report = simulate(&config, &args)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print_summary();
            }
        }
        Cmd::Config { config } => {
            let config = load_config(config.as_deref())?;
            let text = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            print!("{text}");
        }
    }
    Ok(())
}

/// Load and validate a configuration file, or the defaults without one.
pub fn load_config(path: Option<&Path>) -> Result<SimConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Build one process, one shared walker pool and an MMU per core, then
/// push the workload through them.
pub fn simulate(config: &SimConfig, args: &RunArgs) -> Result<RunReport> {
    if !(0.0..=1.0).contains(&args.instruction_ratio) {
        bail!("--instruction-ratio must lie in [0, 1], got {}", args.instruction_ratio);
    }
    if args.cores == 0 {
        bail!("--cores must be at least 1");
    }

    let allocator = ReservationThpAllocator::from_config(&config.allocator)
        .context("Failed to build the physical allocator")?
        .into_shared();
    let mut space = ProcessMemory::from_config(0, &config.os, allocator.clone())
        .context("Failed to set up the address space")?
        .with_trace(config.mmu.debug_trace);

    let workload = Workload::new(
        args.pattern,
        args.footprint_mb << 20,
        args.stride,
        args.instruction_ratio,
        args.cores,
        args.accesses,
        args.seed,
    );
    let region = workload.region();
    space.add_vma(region);
    if config.mmu.design == MmuDesign::Range {
        let ranges = space
            .map_ranges(region)
            .context("Failed to back the workload region with ranges")?;
        log::info!("[RUN] {} ranges cover {:#x}..{:#x}", ranges.len(), region.base, region.end);
    }

    let pool = WalkerPool::new(config.mmu.page_table_walkers).into_shared();
    let mut mmus = (0..args.cores)
        .map(|_| Mmu::from_config(&config.mmu, pool.clone()))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid MMU configuration")?;
    let mut clocks = vec![SimClock::default(); args.cores];
    let mut memory = MemoryModel::from_config(&config.memory);

    log::info!(
        "[RUN] {} requests, {:?} pattern over {} MB on {} cores",
        args.accesses,
        args.pattern,
        args.footprint_mb,
        args.cores
    );
    let mut fault_stalls = 0;
    for req in workload {
        let core = req.core_id;
        let translation = mmus[core]
            .translate(&req, &mut clocks[core], &mut space, &mut memory)
            .with_context(|| format!("Translation of {} failed on core {core}", Addr(req.va)))?;
        if let Some(stall) = translation.fault_stall {
            fault_stalls += 1;
            log::trace!("[RUN] core {core} stalls {stall} on {}", Addr(req.va));
        }
    }

    let allocator = allocator.lock();
    Ok(RunReport {
        design: config.mmu.design,
        requests: args.accesses,
        cycles: clocks.iter().map(SimClock::now).collect(),
        fault_stalls,
        mmus: mmus.iter().map(Mmu::report).collect(),
        allocator: allocator.stats(),
        free_pages: allocator.free_pages(),
        total_pages: allocator.total_pages(),
        large_page_ratio: allocator.large_page_ratio(),
        page_table: space.page_table_stats(),
        os: space.stats(),
        memory: memory.stats(),
    })
}
