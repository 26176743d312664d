//! # Timer Service Tests
//!
//! Exercita o serviço de timers sobre a `SimPlatform`: relógio manual,
//! CPU corrente por thread e registro do deadline programado.
//!
//! Cobertura:
//! - vencimento parcial (só os timers com `expires < now` rodam)
//! - crescimento do heap e drenagem da lista de overflow
//! - callback que rearma o próprio timer
//! - migração e `kill_timer` depois da migração
//! - `kill_timer` esperando o callback que roda em outra CPU
//! - todo timer vivo em exatamente um lugar (heap, lista ou inativos)

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use core::time::Duration;
use std::sync::Mutex;

use super::{align_timer, Timer, TimerFn, TimerService, TimerStatus, DEFAULT_TIMER_SLOP};
use crate::core::smp::{CpuTopology, Softirq, SoftirqTable};
use crate::hal::sim::SimPlatform;
use crate::hal::Platform;
use crate::sys::{CpuId, STime};

struct Env {
    platform: Arc<SimPlatform>,
    topology: Arc<CpuTopology>,
    softirq: Arc<SoftirqTable>,
    svc: Arc<TimerService>,
}

fn env(nr_cpus: usize) -> Env {
    let platform = Arc::new(SimPlatform::new());
    let topology = Arc::new(CpuTopology::new(nr_cpus));
    for cpu in 0..nr_cpus {
        topology.set_online(cpu as CpuId, true);
    }
    let softirq = Arc::new(SoftirqTable::new(platform.clone(), nr_cpus));
    let svc = Arc::new(TimerService::new(
        platform.clone(),
        topology.clone(),
        softirq.clone(),
        DEFAULT_TIMER_SLOP,
    ));
    for cpu in 0..nr_cpus {
        svc.cpu_up_prepare(cpu as CpuId);
    }
    Env {
        platform,
        topology,
        softirq,
        svc,
    }
}

fn counter() -> (Arc<AtomicUsize>, TimerFn) {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    (
        hits,
        Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

fn noop() -> TimerFn {
    Arc::new(|| {})
}

#[test]
fn fires_only_expired_and_reports_next_deadline() {
    let env = env(1);
    let (hits50, cb50) = counter();
    let (hits10, cb10) = counter();
    let (hits30, cb30) = counter();
    let (t50, t10, t30) = (Timer::new(), Timer::new(), Timer::new());

    env.svc.init_timer(&t50, cb50, 0);
    env.svc.init_timer(&t10, cb10, 0);
    env.svc.init_timer(&t30, cb30, 0);
    env.svc.set_timer(&t50, 50);
    env.svc.set_timer(&t10, 10);
    env.svc.set_timer(&t30, 30);
    assert!(env.softirq.pending(0).contains(Softirq::TIMER));

    env.platform.set_now(20);
    assert_eq!(env.svc.softirq_action(0), Some(30));

    assert_eq!(hits10.load(Ordering::SeqCst), 1);
    assert_eq!(hits30.load(Ordering::SeqCst), 0);
    assert_eq!(hits50.load(Ordering::SeqCst), 0);

    assert_eq!(t10.status(), TimerStatus::Inactive);
    assert_eq!(t30.status(), TimerStatus::InHeap);
    assert_eq!(t50.status(), TimerStatus::InHeap);
    assert_eq!(env.svc.queue_lengths(0), (2, 0, 1));

    assert_eq!(env.svc.timer_deadline(0), 30 + DEFAULT_TIMER_SLOP);
    assert_eq!(env.platform.programmed_deadline(0), 30 + DEFAULT_TIMER_SLOP);
}

#[test]
fn expiry_equal_to_now_waits() {
    let env = env(1);
    let (hits, cb) = counter();
    let t = Timer::new();
    env.svc.init_timer(&t, cb, 0);
    env.svc.set_timer(&t, 100);

    env.platform.set_now(100);
    assert_eq!(env.svc.softirq_action(0), Some(100));
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    env.platform.set_now(101);
    assert_eq!(env.svc.softirq_action(0), None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(env.svc.timer_deadline(0), 0);
}

#[test]
fn heap_grows_and_drains_overflow_list() {
    let env = env(1);
    let timers: Vec<Timer> = (0..20).map(|_| Timer::new()).collect();
    for (i, t) in timers.iter().enumerate() {
        env.svc.init_timer(t, noop(), 0);
        env.svc.set_timer(t, 1_000 + i as STime);
    }

    // Heap dummy: tudo na lista
    assert_eq!(env.svc.heap_limit(0), 0);
    assert_eq!(env.svc.queue_lengths(0), (0, 20, 0));

    env.svc.softirq_action(0);
    assert_eq!(env.svc.heap_limit(0), 15);
    assert_eq!(env.svc.queue_lengths(0), (15, 5, 0));

    env.svc.softirq_action(0);
    assert_eq!(env.svc.heap_limit(0), 255);
    assert_eq!(env.svc.queue_lengths(0), (20, 0, 0));
    assert!(timers.iter().all(|t| t.status() == TimerStatus::InHeap));
}

#[test]
fn heap_fires_in_expiry_order() {
    let env = env(1);
    let fired: Arc<Mutex<Vec<STime>>> = Arc::new(Mutex::new(Vec::new()));

    let mut seed = 0x9e37_79b9_7f4a_7c15u64;
    let timers: Vec<Timer> = (0..100).map(|_| Timer::new()).collect();
    for t in &timers {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let expires = 1 + ((seed >> 33) % 10_000) as STime;
        let log = fired.clone();
        env.svc.init_timer(
            t,
            Arc::new(move || log.lock().unwrap().push(expires)),
            0,
        );
        env.svc.set_timer(t, expires);
    }

    // Duas passadas a t=0 levam o heap a 255 sem vencer nada.
    env.svc.softirq_action(0);
    env.svc.softirq_action(0);
    assert_eq!(env.svc.queue_lengths(0), (100, 0, 0));

    env.platform.set_now(20_000);
    assert_eq!(env.svc.softirq_action(0), None);

    let fired = fired.lock().unwrap();
    assert_eq!(fired.len(), 100);
    assert!(fired.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn callback_can_rearm_its_own_timer() {
    let env = env(1);
    let timer = Arc::new(Timer::new());
    let hits = Arc::new(AtomicUsize::new(0));

    let cb: TimerFn = {
        let svc = env.svc.clone();
        let platform = env.platform.clone();
        let timer = timer.clone();
        let hits = hits.clone();
        Arc::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
            svc.set_timer(&timer, platform.now() + 100);
        })
    };
    env.svc.init_timer(&timer, cb, 0);
    env.svc.set_timer(&timer, 100);

    env.platform.set_now(200);
    assert_eq!(env.svc.softirq_action(0), Some(300));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(timer.is_active());

    env.platform.set_now(350);
    assert_eq!(env.svc.softirq_action(0), Some(450));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn migrated_timer_fires_once_on_new_cpu() {
    let env = env(2);
    let (hits, cb) = counter();
    let t = Timer::new();
    env.svc.init_timer(&t, cb, 0);
    env.svc.set_timer(&t, 100);

    env.svc.migrate_timer(&t, 1);
    assert_eq!(t.cpu(), Some(1));
    assert!(t.is_active());
    assert_eq!(env.svc.queue_lengths(0), (0, 0, 0));
    assert_eq!(env.svc.queue_lengths(1), (0, 1, 0));
    assert!(env.softirq.pending(1).contains(Softirq::TIMER));
    assert!(env.platform.ipi_count(1) > 0);

    env.platform.set_now(200);
    env.svc.softirq_action(0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    env.svc.softirq_action(1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    env.svc.softirq_action(1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn kill_after_migration_stops_for_good() {
    let env = env(2);
    let (hits, cb) = counter();
    let t = Timer::new();
    env.svc.init_timer(&t, cb, 0);
    env.svc.set_timer(&t, 100);
    env.svc.migrate_timer(&t, 1);

    env.svc.kill_timer(&t);
    assert_eq!(t.status(), TimerStatus::Killed);
    assert_eq!(t.cpu(), None);
    assert_eq!(env.svc.queue_lengths(1), (0, 0, 0));

    // Operações em timer morto não fazem nada.
    env.svc.set_timer(&t, 150);
    env.svc.migrate_timer(&t, 0);
    env.svc.stop_timer(&t);
    assert_eq!(t.status(), TimerStatus::Killed);

    env.platform.set_now(1_000);
    env.svc.softirq_action(0);
    env.svc.softirq_action(1);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn kill_waits_for_callback_running_elsewhere() {
    let env = env(2);
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let cb: TimerFn = {
        let (started, finished) = (started.clone(), finished.clone());
        Arc::new(move || {
            started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            finished.store(true, Ordering::SeqCst);
        })
    };
    let t = Timer::new();
    env.svc.init_timer(&t, cb, 1);
    env.svc.set_timer(&t, 10);
    env.platform.set_now(20);

    std::thread::scope(|s| {
        let worker = s.spawn(|| {
            let _cpu = SimPlatform::enter_cpu(1);
            env.svc.softirq_action(1);
        });

        // Mata da CPU 0 com o callback ainda dormindo na CPU 1.
        while !started.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        env.svc.kill_timer(&t);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(t.status(), TimerStatus::Killed);

        worker.join().unwrap();
    });

    env.svc.set_timer(&t, 30);
    env.platform.set_now(100);
    env.svc.softirq_action(1);
    assert_eq!(env.svc.queue_lengths(1), (0, 0, 0));
}

#[test]
#[should_panic]
fn kill_from_own_callback_is_fatal() {
    let env = env(1);
    let timer = Arc::new(Timer::new());
    let cb: TimerFn = {
        let svc = env.svc.clone();
        let timer = timer.clone();
        Arc::new(move || svc.kill_timer(&timer))
    };
    env.svc.init_timer(&timer, cb, 0);
    env.svc.set_timer(&timer, 10);

    let _cpu = SimPlatform::enter_cpu(0);
    env.platform.set_now(20);
    env.svc.softirq_action(0);
}

#[test]
fn offline_cpu_timers_move_to_survivor() {
    let env = env(2);
    let (hits, cb) = counter();
    let armed = Timer::new();
    let idle = Timer::new();
    env.svc.init_timer(&armed, cb, 1);
    env.svc.init_timer(&idle, noop(), 1);
    env.svc.set_timer(&armed, 100);

    // CPU 1 sai do ar; a única sobrevivente é a 0.
    env.topology.set_online(1, false);
    env.svc.migrate_timers_from_cpu(1);
    assert_eq!(armed.cpu(), Some(0));
    assert_eq!(idle.cpu(), Some(0));
    assert_eq!(env.svc.queue_lengths(1), (0, 0, 0));
    assert_eq!(env.svc.queue_lengths(0), (0, 1, 1));

    env.platform.set_now(200);
    env.svc.softirq_action(0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn every_timer_lives_in_exactly_one_place() {
    let env = env(2);
    let timers: Vec<Timer> = (0..40).map(|_| Timer::new()).collect();
    for (i, t) in timers.iter().enumerate() {
        env.svc.init_timer(t, noop(), (i % 2) as CpuId);
    }

    let mut seed = 0x2545_f491_4f6c_dd1du64;
    for step in 0..500 {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let t = &timers[(seed >> 33) as usize % timers.len()];
        match (seed >> 20) % 4 {
            0 | 1 => env.svc.set_timer(t, 1_000 + ((seed >> 8) % 100_000) as STime),
            2 => env.svc.stop_timer(t),
            _ => env.svc.migrate_timer(t, ((seed >> 40) % 2) as CpuId),
        }
        if step % 50 == 0 {
            env.svc.softirq_action(0);
            env.svc.softirq_action(1);
        }

        let (mut heap, mut list, mut inactive) = (0, 0, 0);
        for cpu in 0..2 {
            let (h, l, i) = env.svc.queue_lengths(cpu);
            heap += h;
            list += l;
            inactive += i;
        }
        let count = |s: TimerStatus| timers.iter().filter(|t| t.status() == s).count();
        assert_eq!(heap + list + inactive, timers.len());
        assert_eq!(count(TimerStatus::InHeap), heap);
        assert_eq!(count(TimerStatus::InList), list);
        assert_eq!(count(TimerStatus::Inactive), inactive);
    }
}

#[test]
fn align_timer_rounds_up_to_period() {
    assert_eq!(align_timer(10, 5), 10);
    assert_eq!(align_timer(11, 5), 15);
    assert_eq!(align_timer(0, 5), 0);
    assert_eq!(align_timer(1, 1_000), 1_000);
    assert_eq!(align_timer(1234, 0), 1234);
}
