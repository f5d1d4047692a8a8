use {
    pinning_cpu_utils::AffinityDescriptor,
    pinning_thread_manager::*,
    std::{path::PathBuf, thread},
};

fn report(label: &str) {
    let name = thread::current().name().unwrap_or("<unnamed>").to_string();
    let cores = pinning_cpu_utils::current_native_id()
        .and_then(pinning_cpu_utils::thread_affinity)
        .map(|cores| cores.to_string())
        .unwrap_or_else(|err| format!("unknown ({err})"));
    println!("{label:<10} {name:<16} cores {cores}");
}

fn main() -> anyhow::Result<()> {
    solana_logger::setup();

    let mut conffile = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    conffile.push("examples/affinity_policy.toml");
    let config = AffinityConfig::from_toml_str(&std::fs::read_to_string(conffile)?)?;
    let registry = AffinityGroupRegistry::global();
    registry.swap_configuration(&config)?;

    let runtime = TokioRuntime::new(
        "solNet".to_string(),
        TokioConfig {
            worker_threads: 2,
            ..TokioConfig::default()
        },
        InterceptionHook::global(),
    )?;
    runtime.start(async {
        tokio::spawn(async { report("tokio") }).await?;
        tokio::task::spawn_blocking(|| report("blocking")).await
    })?;

    let compute = AffinityThreadFactory::from_allocation(
        &CoreAllocation::from_group("compute"),
        &registry.snapshot(),
    )?
    .with_name_prefix("solCompute");
    let pool = PinnedRayonPool::new(
        "solCompute".to_string(),
        RayonConfig {
            worker_threads: 2,
            ..RayonConfig::default()
        },
        compute,
    )?;
    pool.install(|| report("rayon"));

    spawn_intercepted(
        thread::Builder::new().name("solMisc".to_string()),
        InterceptionHook::global(),
        || report("std"),
    )?
    .join()
    .map_err(|_| anyhow::anyhow!("solMisc panicked"))?;

    let pinned = PinnedThread::new(|| report("pinned"))
        .name("solPinned")
        .affinity(AffinityDescriptor::from_cores([0])?)
        .start()?;
    pinned
        .join()
        .map_err(|_| anyhow::anyhow!("solPinned panicked"))?;
    Ok(())
}
