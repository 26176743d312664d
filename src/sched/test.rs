//! # Scheduler Tests
//!
//! Executivo cíclico ARINC 653 isolado (tabela, dispatch, validação) e o
//! caminho completo de dispatch via `Machine`: softirq de timer → timer de
//! scheduler → `SCHEDULE` → `do_schedule`.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::config::SCHED_ID_ARINC653;
use super::{
    Arinc653, Arinc653Schedule, Domain, GlobalParams, ScheduleEntry, Scheduler, SchedulerOp,
    TaskSlice,
};
use crate::core::boot::BootParams;
use crate::core::machine::Machine;
use crate::core::smp::Softirq;
use crate::hal::sim::SimPlatform;
use crate::sys::{millisecs, CpuId, DomId, DomainHandle, Errno, PoolId, STime};

const DOM_A: DomainHandle = DomainHandle([0xa; 16]);
const DOM_B: DomainHandle = DomainHandle([0xb; 16]);

fn entry(dom_handle: DomainHandle, vcpu_id: u32, runtime: STime) -> ScheduleEntry {
    ScheduleEntry {
        dom_handle,
        vcpu_id,
        runtime,
    }
}

fn table(major_frame: STime, entries: Vec<ScheduleEntry>) -> Arinc653Schedule {
    Arinc653Schedule {
        major_frame,
        entries,
    }
}

/// `[(dom0, 4ms), (domA, 6ms)]` em 10ms
fn split_table() -> Arinc653Schedule {
    table(
        millisecs(10),
        vec![
            entry(DomainHandle::SYSTEM, 0, millisecs(4)),
            entry(DOM_A, 0, millisecs(6)),
        ],
    )
}

/// Liga as VCPUs de `d` ao scheduler, prontas e acordadas, na CPU 0
fn attach(sched: &mut Arinc653, d: &Arc<Domain>) {
    for v in d.vcpus() {
        let p = sched.alloc_vdata(v, None).unwrap();
        v.swap_sched_priv(p);
        v.set_runnable(true);
        sched.wake(v);
    }
}

fn detach(sched: &mut Arinc653, d: &Arc<Domain>) {
    for v in d.vcpus() {
        sched.free_vdata(v.swap_sched_priv(None));
    }
}

fn who(slice: &TaskSlice) -> Option<(DomId, u32)> {
    slice.task.as_ref().map(|v| (v.dom_id(), v.vcpu_id()))
}

struct Fixture {
    sched: Arinc653,
    dom0: Arc<Domain>,
    dom_a: Arc<Domain>,
}

fn fixture() -> Fixture {
    let mut sched = Arinc653::new();
    sched.init().unwrap();
    sched.alloc_pdata(0).unwrap();

    let dom0 = Domain::new(DomId::SYSTEM, DomainHandle::SYSTEM, 1);
    let dom_a = Domain::new(DomId::new(1), DOM_A, 1);
    attach(&mut sched, &dom0);
    attach(&mut sched, &dom_a);
    sched.set(&split_table(), 0).unwrap();

    Fixture { sched, dom0, dom_a }
}

// =============================================================================
// EXECUTIVO CÍCLICO
// =============================================================================

#[test]
fn default_table_after_init() {
    let mut sched = Arinc653::new();
    sched.init().unwrap();
    assert_eq!(
        sched.get(),
        table(
            millisecs(10),
            vec![entry(DomainHandle::SYSTEM, 0, millisecs(10))]
        )
    );
    assert_eq!(sched.opt_name(), "arinc653");
    assert_eq!(sched.sched_id(), SCHED_ID_ARINC653);
}

#[test]
fn split_frame_walks_table_and_wraps() {
    let mut f = fixture();
    let dom_a = f.dom_a.id();

    let s = f.sched.do_schedule(0, 0, false);
    assert_eq!(who(&s), Some((DomId::SYSTEM, 0)));
    assert_eq!(s.time, millisecs(4));
    assert!(!s.migrated);

    let s = f.sched.do_schedule(0, millisecs(4), false);
    assert_eq!(who(&s), Some((dom_a, 0)));
    assert_eq!(s.time, millisecs(6));

    let s = f.sched.do_schedule(0, millisecs(10), false);
    assert_eq!(who(&s), Some((DomId::SYSTEM, 0)));
    assert_eq!(s.time, millisecs(4));
}

#[test]
fn mid_slice_dispatch_returns_remaining_time() {
    let mut f = fixture();
    f.sched.do_schedule(0, 0, false);

    let s = f.sched.do_schedule(0, millisecs(1), false);
    assert_eq!(who(&s), Some((DomId::SYSTEM, 0)));
    assert_eq!(s.time, millisecs(3));

    let s = f.sched.do_schedule(0, millisecs(7), false);
    assert_eq!(who(&s), Some((f.dom_a.id(), 0)));
    assert_eq!(s.time, millisecs(3));
}

#[test]
fn idle_fills_rest_of_major_frame() {
    let mut f = fixture();
    f.sched
        .set(
            &table(
                millisecs(10),
                vec![
                    entry(DomainHandle::SYSTEM, 0, millisecs(2)),
                    entry(DOM_A, 0, millisecs(3)),
                ],
            ),
            0,
        )
        .unwrap();

    f.sched.do_schedule(0, 0, false);
    f.sched.do_schedule(0, millisecs(2), false);
    let s = f.sched.do_schedule(0, millisecs(5), false);
    assert_eq!(who(&s), None);
    assert_eq!(s.time, millisecs(5));
}

#[test]
fn replay_gives_identical_decisions() {
    let times: Vec<STime> = [0, 1, 4, 5, 9, 10, 12, 14, 19, 20, 31, 44]
        .iter()
        .map(|&ms| millisecs(ms))
        .collect();

    let run = |times: &[STime]| {
        let mut f = fixture();
        times
            .iter()
            .map(|&now| {
                let s = f.sched.do_schedule(0, now, false);
                (who(&s), s.time)
            })
            .collect::<Vec<_>>()
    };

    let first = run(&times);
    let second = run(&times);
    assert_eq!(first, second);
    assert!(first.iter().all(|(_, time)| *time > 0));
}

#[test]
fn tasklet_work_forces_idle_but_keeps_slice() {
    let mut f = fixture();
    let s = f.sched.do_schedule(0, 0, true);
    assert_eq!(who(&s), None);
    assert_eq!(s.time, millisecs(4));
}

#[test]
fn sleeping_or_blocked_vcpu_yields_idle() {
    let mut f = fixture();
    let v = f.dom0.vcpus()[0].clone();

    f.sched.sleep(&v);
    assert_eq!(who(&f.sched.do_schedule(0, 0, false)), None);

    f.sched.wake(&v);
    v.set_runnable(false);
    assert_eq!(who(&f.sched.do_schedule(0, millisecs(1), false)), None);

    v.set_runnable(true);
    assert_eq!(
        who(&f.sched.do_schedule(0, millisecs(2), false)),
        Some((DomId::SYSTEM, 0))
    );
}

#[test]
fn vcpu_on_another_cpu_is_not_dispatched_here() {
    let mut f = fixture();
    f.dom0.vcpus()[0].set_processor(1);
    assert_eq!(who(&f.sched.do_schedule(0, 0, false)), None);
}

#[test]
fn entries_follow_vcpu_arrival_and_departure() {
    let mut f = fixture();
    let dom_b = Domain::new(DomId::new(2), DOM_B, 2);
    f.sched
        .set(
            &table(
                millisecs(10),
                vec![
                    entry(DomainHandle::SYSTEM, 0, millisecs(5)),
                    entry(DOM_B, 1, millisecs(5)),
                ],
            ),
            0,
        )
        .unwrap();

    // domB ainda não existe: a entrada é idle.
    f.sched.do_schedule(0, 0, false);
    assert_eq!(who(&f.sched.do_schedule(0, millisecs(5), false)), None);

    attach(&mut f.sched, &dom_b);
    f.sched.do_schedule(0, millisecs(10), false);
    assert_eq!(
        who(&f.sched.do_schedule(0, millisecs(15), false)),
        Some((DomId::new(2), 1))
    );

    detach(&mut f.sched, &dom_b);
    f.sched.do_schedule(0, millisecs(20), false);
    assert_eq!(who(&f.sched.do_schedule(0, millisecs(25), false)), None);
}

#[test]
fn illegal_tables_leave_current_one_in_place() {
    let mut f = fixture();
    let before = f.sched.get();

    let mut too_long = vec![entry(DomainHandle::SYSTEM, 0, 1)];
    too_long.extend((0..64).map(|i| entry(DOM_A, i, 1)));

    let bad = [
        // Soma maior que o frame
        table(
            millisecs(10),
            vec![
                entry(DomainHandle::SYSTEM, 0, millisecs(6)),
                entry(DOM_A, 0, millisecs(5)),
            ],
        ),
        // Sem domínio de sistema
        table(millisecs(10), vec![entry(DOM_A, 0, millisecs(5))]),
        // Runtime zero e negativo
        table(millisecs(10), vec![entry(DomainHandle::SYSTEM, 0, 0)]),
        table(millisecs(10), vec![entry(DomainHandle::SYSTEM, 0, -1)]),
        // VCPU fora da faixa
        table(millisecs(10), vec![entry(DomainHandle::SYSTEM, 128, 1)]),
        // Vazia, frame nulo, grande demais
        table(millisecs(10), vec![]),
        table(0, vec![entry(DomainHandle::SYSTEM, 0, 1)]),
        table(millisecs(10), too_long),
    ];

    for t in bad {
        assert_eq!(
            f.sched
                .adjust_global(SchedulerOp::PutInfo(GlobalParams::Arinc653(t)), millisecs(3)),
            Err(Errno::EINVAL)
        );
        assert_eq!(f.sched.get(), before);
    }

    // O dispatch segue a tabela antiga sem reiniciar o frame.
    f.sched.do_schedule(0, 0, false);
    let s = f.sched.do_schedule(0, millisecs(4), false);
    assert_eq!(who(&s), Some((f.dom_a.id(), 0)));
}

#[test]
fn exact_fit_table_is_accepted() {
    let mut f = fixture();
    let t = table(
        millisecs(10),
        vec![
            entry(DomainHandle::SYSTEM, 0, millisecs(7)),
            entry(DOM_A, 127, millisecs(3)),
        ],
    );
    assert_eq!(
        f.sched
            .adjust_global(SchedulerOp::PutInfo(GlobalParams::Arinc653(t.clone())), 0),
        Ok(None)
    );
    assert_eq!(
        f.sched.adjust_global(SchedulerOp::GetInfo, 0),
        Ok(Some(GlobalParams::Arinc653(t)))
    );
}

#[test]
fn new_table_takes_effect_mid_frame() {
    let mut f = fixture();
    let s = f.sched.do_schedule(0, 0, false);
    assert_eq!(who(&s), Some((DomId::SYSTEM, 0)));

    f.sched
        .set(
            &table(
                millisecs(5),
                vec![
                    entry(DOM_A, 0, millisecs(2)),
                    entry(DomainHandle::SYSTEM, 0, millisecs(3)),
                ],
            ),
            millisecs(3),
        )
        .unwrap();

    let s = f.sched.do_schedule(0, millisecs(3), false);
    assert_eq!(who(&s), Some((f.dom_a.id(), 0)));
    assert_eq!(s.time, millisecs(2));
}

#[test]
fn pick_cpu_prefers_current_owned_cpu() {
    let mut sched = Arinc653::new();
    sched.init().unwrap();
    let d = Domain::new(DomId::new(1), DOM_A, 1);
    let v = d.vcpus()[0].clone();

    assert_eq!(sched.pick_cpu(&v), 0);

    sched.alloc_pdata(2).unwrap();
    sched.alloc_pdata(3).unwrap();
    assert_eq!(sched.pick_cpu(&v), 2);

    v.set_processor(3);
    assert_eq!(sched.pick_cpu(&v), 3);

    sched.free_pdata(None, 3);
    assert_eq!(sched.pick_cpu(&v), 2);
}

#[test]
fn dump_settings_lists_entries() {
    let f = fixture();
    let mut out = alloc::string::String::new();
    f.sched.dump_settings(&mut out).unwrap();
    assert!(out.contains("major_frame=10000us entries=2"));
    assert!(out.contains("runtime=4000us"));
    assert!(out.contains("runtime=6000us"));
}

// =============================================================================
// DISPATCH COMPLETO
// =============================================================================

fn boot(nr_cpus: usize) -> (Arc<SimPlatform>, Machine) {
    let platform = Arc::new(SimPlatform::new());
    let params = BootParams {
        nr_cpus,
        ..BootParams::default()
    };
    let machine = Machine::boot(platform.clone(), &params).unwrap();
    (platform, machine)
}

/// Processa softirqs de `cpu` até esvaziar; devolve o último dispatch
fn run_softirqs(m: &Machine, cpu: CpuId) -> Option<TaskSlice> {
    let mut last = None;
    for _ in 0..8 {
        if m.softirq().pending(cpu).is_empty() {
            break;
        }
        if let (_, Some(slice)) = m.do_softirq(cpu) {
            last = Some(slice);
        }
    }
    last
}

/// Simula a interrupção do timer de hardware em `now`
fn tick(platform: &SimPlatform, m: &Machine, cpu: CpuId, now: STime) -> Option<TaskSlice> {
    platform.set_now(now);
    m.softirq().raise(cpu, Softirq::TIMER);
    run_softirqs(m, cpu)
}

#[test]
fn boot_dispatches_system_domain() {
    let (_platform, m) = boot(2);
    let s = run_softirqs(&m, 0).unwrap();
    assert_eq!(who(&s), Some((DomId::SYSTEM, 0)));
    assert_eq!(s.time, millisecs(10));

    let curr = m.sched().curr(0).unwrap();
    assert_eq!(curr.dom_id(), DomId::SYSTEM);
    assert_eq!(m.sched().cpu_pool(0).map(|c| c.id()), Some(PoolId::DEFAULT));
}

#[test]
fn boot_with_zero_cpus_still_brings_up_cpu0() {
    let (_platform, m) = boot(0);
    assert_eq!(m.topology().nr_cpu_ids(), 1);
    assert!(m.topology().is_online(0));

    let s = run_softirqs(&m, 0).unwrap();
    assert_eq!(who(&s), Some((DomId::SYSTEM, 0)));
    assert!(!m.calls().has_pending(0));
    assert_eq!(m.cpu_up(1), Err(Errno::EINVAL));
}

#[test]
fn scheduler_timer_drives_table() {
    let (platform, m) = boot(1);
    m.domain_create(DomId::new(1), DOM_A, 1, Some(PoolId::DEFAULT))
        .unwrap();
    m.vcpu_wake(DomId::new(1), 0).unwrap();
    m.scheduler_op(
        PoolId::DEFAULT,
        SCHED_ID_ARINC653,
        SchedulerOp::PutInfo(GlobalParams::Arinc653(split_table())),
    )
    .unwrap();

    let s = run_softirqs(&m, 0).unwrap();
    assert_eq!(who(&s), Some((DomId::SYSTEM, 0)));
    assert_eq!(s.time, millisecs(4));

    // Timer de scheduler vence logo depois de 4ms.
    let s = tick(&platform, &m, 0, millisecs(4) + 1).unwrap();
    assert_eq!(who(&s), Some((DomId::new(1), 0)));
    assert_eq!(s.time, millisecs(6) - 1);

    let s = tick(&platform, &m, 0, millisecs(10) + 1).unwrap();
    assert_eq!(who(&s), Some((DomId::SYSTEM, 0)));
    assert_eq!(s.time, millisecs(4));
}

#[test]
fn sleeping_current_vcpu_reschedules() {
    let (_platform, m) = boot(1);
    run_softirqs(&m, 0);

    m.vcpu_sleep(DomId::SYSTEM, 0).unwrap();
    assert!(m.softirq().pending(0).contains(Softirq::SCHEDULE));
    let s = run_softirqs(&m, 0).unwrap();
    assert_eq!(who(&s), None);
    assert!(m.sched().curr(0).is_none());

    m.vcpu_wake(DomId::SYSTEM, 0).unwrap();
    let s = run_softirqs(&m, 0).unwrap();
    assert_eq!(who(&s), Some((DomId::SYSTEM, 0)));
}

#[test]
fn scheduler_op_checks_pool_and_id() {
    let (_platform, m) = boot(1);
    assert_eq!(
        m.scheduler_op(PoolId::new(9), SCHED_ID_ARINC653, SchedulerOp::GetInfo),
        Err(Errno::ESRCH)
    );
    assert_eq!(
        m.scheduler_op(PoolId::DEFAULT, 99, SchedulerOp::GetInfo),
        Err(Errno::EINVAL)
    );
    assert!(matches!(
        m.scheduler_op(PoolId::DEFAULT, SCHED_ID_ARINC653, SchedulerOp::GetInfo),
        Ok(Some(GlobalParams::Arinc653(_)))
    ));
}

#[test]
fn destroyed_domain_leaves_the_table_idle() {
    let (platform, m) = boot(1);
    m.domain_create(DomId::new(1), DOM_A, 1, Some(PoolId::DEFAULT))
        .unwrap();
    m.vcpu_wake(DomId::new(1), 0).unwrap();
    m.scheduler_op(
        PoolId::DEFAULT,
        SCHED_ID_ARINC653,
        SchedulerOp::PutInfo(GlobalParams::Arinc653(split_table())),
    )
    .unwrap();
    run_softirqs(&m, 0);

    assert_eq!(m.domain_destroy(DomId::new(1)), Err(Errno::EBUSY));
    m.domain_kill(DomId::new(1)).unwrap();
    m.domain_destroy(DomId::new(1)).unwrap();
    assert!(m.domains().get(DomId::new(1)).is_none());

    let s = tick(&platform, &m, 0, millisecs(4) + 1).unwrap();
    assert_eq!(who(&s), None);
}

#[test]
fn handle_key_dumps_queues() {
    let (_platform, m) = boot(2);
    run_softirqs(&m, 0);

    let mut out = alloc::string::String::new();
    m.handle_key('a', &mut out).unwrap();
    assert!(out.contains("Dumping timer queues:"));
    assert!(out.contains("CPU00:"));

    out.clear();
    m.handle_key('r', &mut out).unwrap();
    assert!(out.contains("Cpupool 0:"));
    assert!(out.contains("curr=d0v0"));

    out.clear();
    m.handle_key('z', &mut out).unwrap();
    assert!(out.contains("unknown key"));
}
