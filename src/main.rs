use std::{env, fs::remove_file, process::exit, thread};

use demand_pager::{PagingSystem, Pid, Result, VmConfig, VmError, VmStats};
use disk::{make_name, Disk};
use log::{error, info};
use memory::SimulatedMmu;

const PAGE_SIZE: usize = 512;
const SWAP_CAPACITY: usize = PAGE_SIZE * 256;
const DISK_NAME: &str = "demand-pager-swap";

type SwapDisk = Disk<PAGE_SIZE, SWAP_CAPACITY>;

fn arg(args: &[String], index: usize, default: usize) -> usize {
    match args.get(index) {
        Some(value) => value.parse().unwrap_or_else(|_| {
            eprintln!("usage: demand-pager [pages] [frames] [pagers] [processes]");
            exit(2)
        }),
        None => default,
    }
}

/// Byte a process stores at `offset`, so every process leaves a distinct
/// pattern behind.
fn pattern(pid: Pid, offset: usize) -> u8 {
    (pid * 31 + offset / PAGE_SIZE * 7 + offset % 251) as u8
}

fn run_process(system: &PagingSystem<SimulatedMmu, SwapDisk>, pid: Pid, pages: usize) -> Result<()> {
    let process = system.process(pid);
    let stride = PAGE_SIZE / 4;
    for round in 0..2 {
        for offset in (0..pages * PAGE_SIZE).step_by(stride) {
            if round == 0 {
                process.write_u8(offset, pattern(pid, offset))?;
            } else {
                let found = process.read_u8(offset)?;
                assert_eq!(
                    found,
                    pattern(pid, offset),
                    "pid {} read back the wrong byte at {:#x}",
                    pid,
                    offset
                );
            }
        }
    }
    info!("pid {} verified {} pages", pid, pages);
    process.exit()
}

fn run(config: VmConfig, processes: usize) -> Result<VmStats> {
    let disk = SwapDisk::create(DISK_NAME).map_err(|source| VmError::Device {
        op: "create swap disk",
        source,
    })?;
    let system = PagingSystem::new(SimulatedMmu::new(PAGE_SIZE), disk);
    let base = system.initialize(config)?;
    info!("virtual region at {:#x}", base);

    let outcome = thread::scope(|scope| {
        let workers: Vec<_> = (0..processes)
            .map(|pid| {
                let system = &system;
                scope.spawn(move || {
                    system.on_fork(pid)?;
                    run_process(system, pid, config.pages)
                })
            })
            .collect();
        workers
            .into_iter()
            .enumerate()
            .map(|(pid, worker)| {
                worker
                    .join()
                    .unwrap_or_else(|_| Err(VmError::Halted(format!("pid {} panicked", pid))))
            })
            .collect::<Result<Vec<_>>>()
    });

    system.shutdown()?;
    let stats = system.stats().unwrap_or_default();
    outcome.map(|_| stats)
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let pages = arg(&args, 1, 16);
    let frames = arg(&args, 2, 6);
    let pagers = arg(&args, 3, 2);
    let processes = arg(&args, 4, 3);
    let config = VmConfig::new(pages, pages, frames, pagers);
    if processes > config.max_processes {
        eprintln!(
            "demand-pager: at most {} processes can run at once",
            config.max_processes
        );
        exit(2);
    }

    let result = run(config, processes);
    let _ = remove_file(make_name(DISK_NAME));
    match result {
        Ok(stats) => println!("{}", stats),
        Err(err) => {
            error!("{}", err);
            eprintln!("demand-pager: {}", err);
            exit(1);
        }
    }
}
