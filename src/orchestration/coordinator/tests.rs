use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::monitor::ResourceSampler;
use super::*;
use crate::config::{JobSpec, ScalingConfig};

/// Deterministic sampler for driving scaling decisions in tests
struct StaticSampler {
    cpu: parking_lot::Mutex<f64>,
    memory: parking_lot::Mutex<f64>,
}

impl StaticSampler {
    fn new(cpu: f64, memory: f64) -> Arc<Self> {
        Arc::new(Self {
            cpu: parking_lot::Mutex::new(cpu),
            memory: parking_lot::Mutex::new(memory),
        })
    }

    fn set_cpu(&self, cpu: f64) {
        *self.cpu.lock() = cpu;
    }
}

impl ResourceSampler for StaticSampler {
    fn cpu_usage(&self) -> f64 {
        *self.cpu.lock()
    }

    fn memory_usage(&self) -> f64 {
        *self.memory.lock()
    }
}

fn fast_scaling_config() -> ScalingConfig {
    ScalingConfig {
        evaluation_interval: Duration::from_millis(50),
        performance_window: Duration::from_millis(100),
        ..ScalingConfig::default()
    }
}

fn spec_with_concurrency(max_concurrency: usize) -> JobSpec {
    JobSpec {
        max_concurrency,
        ..JobSpec::default()
    }
}

#[tokio::test]
async fn test_slots_bound_concurrent_work() {
    let controller =
        ConcurrencyController::with_sampler(fast_scaling_config(), StaticSampler::new(0.1, 0.1));
    let ctx = Arc::new(controller.create_batch_context(&spec_with_concurrency(3)));

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ctx = ctx.clone();
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let slot = ctx.acquire_processing_slot("research").await.unwrap();
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            slot.record_success();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_effective_concurrency_starts_at_job_max() {
    let controller =
        ConcurrencyController::with_sampler(fast_scaling_config(), StaticSampler::new(0.1, 0.1));
    let ctx = controller.create_batch_context(&spec_with_concurrency(7));
    assert_eq!(ctx.effective_concurrency(), 7);
}

#[tokio::test]
async fn test_hard_ceiling_caps_job_max() {
    let config = ScalingConfig {
        hard_ceiling: 4,
        ..fast_scaling_config()
    };
    let controller = ConcurrencyController::with_sampler(config, StaticSampler::new(0.1, 0.1));
    let ctx = controller.create_batch_context(&spec_with_concurrency(100));
    assert_eq!(ctx.effective_concurrency(), 4);
}

#[tokio::test]
async fn test_cpu_pressure_reduces_effective_concurrency() {
    let sampler = StaticSampler::new(0.95, 0.1);
    let controller =
        ConcurrencyController::with_sampler(fast_scaling_config(), sampler.clone());
    let ctx = controller.create_batch_context(&spec_with_concurrency(10));

    // Let the monitor loop run a few evaluations under pressure
    tokio::time::sleep(Duration::from_millis(200)).await;
    let reduced = ctx.effective_concurrency();
    assert!(reduced < 10, "expected reduction, got {reduced}");
    assert!(reduced >= 1);

    sampler.set_cpu(0.1);
}

#[tokio::test]
async fn test_concurrency_never_drops_below_one() {
    let sampler = StaticSampler::new(0.99, 0.99);
    let controller = ConcurrencyController::with_sampler(fast_scaling_config(), sampler);
    let ctx = controller.create_batch_context(&spec_with_concurrency(2));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(ctx.effective_concurrency(), 1);

    // The last permit is still grantable
    let slot = ctx.acquire_processing_slot("research").await.unwrap();
    slot.record_success();
}

#[tokio::test]
async fn test_stable_window_grows_back_toward_ceiling() {
    let sampler = StaticSampler::new(0.95, 0.1);
    let config = ScalingConfig {
        evaluation_interval: Duration::from_millis(20),
        performance_window: Duration::from_millis(40),
        ..ScalingConfig::default()
    };
    let controller = ConcurrencyController::with_sampler(config, sampler.clone());
    let ctx = controller.create_batch_context(&spec_with_concurrency(10));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let reduced = ctx.effective_concurrency();
    assert!(reduced < 10);

    // Pressure clears; stable evaluations should grow the pool again
    sampler.set_cpu(0.1);
    tokio::time::sleep(Duration::from_millis(400)).await;
    let recovered = ctx.effective_concurrency();
    assert!(
        recovered > reduced,
        "expected growth from {reduced}, got {recovered}"
    );
    assert!(recovered <= 10);
}

#[tokio::test]
async fn test_shutdown_rejects_new_slots() {
    let controller =
        ConcurrencyController::with_sampler(fast_scaling_config(), StaticSampler::new(0.1, 0.1));
    let mut ctx = controller.create_batch_context(&spec_with_concurrency(2));

    ctx.shutdown().await;
    assert!(ctx.acquire_processing_slot("research").await.is_err());
}

#[tokio::test]
async fn test_slot_released_on_drop_without_outcome() {
    let controller =
        ConcurrencyController::with_sampler(fast_scaling_config(), StaticSampler::new(0.1, 0.1));
    let ctx = controller.create_batch_context(&spec_with_concurrency(1));

    {
        let _slot = ctx.acquire_processing_slot("research").await.unwrap();
        // Dropped without record_success/record_failure (e.g. cancellation)
    }

    // The single permit must be available again
    let slot = tokio::time::timeout(
        Duration::from_secs(1),
        ctx.acquire_processing_slot("research"),
    )
    .await
    .expect("slot was not released on drop")
    .unwrap();
    slot.record_success();
}

#[tokio::test]
async fn test_failure_outcomes_feed_window_stats() {
    let controller =
        ConcurrencyController::with_sampler(fast_scaling_config(), StaticSampler::new(0.1, 0.1));
    let ctx = controller.create_batch_context(&spec_with_concurrency(2));

    let slot = ctx.acquire_processing_slot("research").await.unwrap();
    slot.record_failure().await;
    let slot = ctx.acquire_processing_slot("research").await.unwrap();
    slot.record_success();

    let health = ctx.health();
    assert_eq!(health.window.total, 2);
    assert_eq!(health.window.failures, 1);
}
