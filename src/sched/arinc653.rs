//! Executivo cíclico ARINC 653
//!
//! Escalonamento estático: uma tabela de fatias `(handle do domínio, VCPU,
//! runtime)` é percorrida em ordem dentro de cada *major frame*. Tempo que
//! sobra no frame depois da última fatia é da VCPU idle.
//!
//! Cada entrada da tabela aponta para a VCPU correspondente da lista deste
//! scheduler. A resolução é refeita sempre que uma VCPU entra ou sai
//! (`alloc_vdata`/`free_vdata`) e quando uma tabela nova é instalada. Entradas
//! sem VCPU viram idle na hora do dispatch.
//!
//! O estado de dispatch (`sched_index`, `next_switch_time`,
//! `next_major_frame`) pertence à instância, não é global.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use super::config::{
    ARINC653_MAX_DOMAINS_PER_SCHEDULE, DEFAULT_TIMESLICE, MAX_VIRT_CPUS, SCHED_ID_ARINC653,
};
use super::domain::Vcpu;
use super::plugin::{
    Arinc653Schedule, GlobalParams, SchedPriv, ScheduleEntry, Scheduler, SchedulerOp, TaskSlice,
};
use crate::klib::CpuMask;
use crate::sys::{CpuId, DomainHandle, Errno, STime, SysResult};

/// Dado privado de uma VCPU neste scheduler
struct A653Vcpu {
    vcpu: Weak<Vcpu>,
    awake: AtomicBool,
}

/// Entrada da tabela mais a VCPU resolvida
struct Slot {
    entry: ScheduleEntry,
    vc: Option<Arc<A653Vcpu>>,
}

pub struct Arinc653 {
    schedule: Vec<Slot>,
    major_frame: STime,
    next_major_frame: STime,
    sched_index: usize,
    next_switch_time: STime,
    vcpu_list: Vec<Arc<A653Vcpu>>,
    /// CPUs físicas atribuídas a esta instância
    cpus: CpuMask,
}

impl Arinc653 {
    pub fn new() -> Self {
        Self {
            schedule: Vec::new(),
            major_frame: 0,
            next_major_frame: 0,
            sched_index: 0,
            next_switch_time: 0,
            vcpu_list: Vec::new(),
            cpus: CpuMask::new(),
        }
    }

    fn avcpu_of(vcpu: &Vcpu) -> Option<Arc<A653Vcpu>> {
        vcpu.sched_priv
            .lock()
            .as_ref()
            .and_then(|p| p.downcast_ref::<Arc<A653Vcpu>>())
            .cloned()
    }

    fn find_vcpu(&self, handle: &DomainHandle, vcpu_id: u32) -> Option<Arc<A653Vcpu>> {
        self.vcpu_list
            .iter()
            .find(|a| {
                a.vcpu
                    .upgrade()
                    .is_some_and(|v| v.dom_handle() == *handle && v.vcpu_id() == vcpu_id)
            })
            .cloned()
    }

    /// Refaz o apontamento entrada -> VCPU
    fn update_schedule_vcpus(&mut self) {
        for i in 0..self.schedule.len() {
            let entry = self.schedule[i].entry;
            self.schedule[i].vc = self.find_vcpu(&entry.dom_handle, entry.vcpu_id);
        }
    }

    fn runtime_at(&self, index: usize) -> STime {
        // Depois da última entrada conta como zero.
        self.schedule.get(index).map_or(0, |s| s.entry.runtime)
    }

    fn validate(table: &Arinc653Schedule) -> SysResult<()> {
        if table.major_frame <= 0
            || table.entries.is_empty()
            || table.entries.len() > ARINC653_MAX_DOMAINS_PER_SCHEDULE
        {
            return Err(Errno::EINVAL);
        }

        let mut total_runtime: STime = 0;
        let mut found_system = false;
        for e in &table.entries {
            if e.dom_handle.is_system() {
                found_system = true;
            }
            if e.vcpu_id >= MAX_VIRT_CPUS || e.runtime <= 0 {
                return Err(Errno::EINVAL);
            }
            total_runtime = total_runtime.saturating_add(e.runtime);
        }

        if !found_system || total_runtime > table.major_frame {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }

    /// Instala uma tabela nova, que vale imediatamente: o próximo dispatch
    /// abre um major frame novo. Tabela inválida deixa a atual intacta.
    pub fn set(&mut self, table: &Arinc653Schedule, now: STime) -> SysResult<()> {
        Self::validate(table)?;

        let mut schedule = Vec::new();
        schedule.try_reserve_exact(table.entries.len())?;
        schedule.extend(table.entries.iter().map(|&entry| Slot { entry, vc: None }));

        self.schedule = schedule;
        self.major_frame = table.major_frame;
        self.update_schedule_vcpus();
        self.next_major_frame = now;

        crate::kinfo!("(A653) Nova tabela instalada, entradas=", self.schedule.len());
        Ok(())
    }

    /// Cópia da tabela em vigor
    pub fn get(&self) -> Arinc653Schedule {
        Arinc653Schedule {
            major_frame: self.major_frame,
            entries: self.schedule.iter().map(|s| s.entry).collect(),
        }
    }
}

impl Default for Arinc653 {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for Arinc653 {
    fn name(&self) -> &'static str {
        "ARINC 653 Scheduler"
    }

    fn opt_name(&self) -> &'static str {
        "arinc653"
    }

    fn sched_id(&self) -> u32 {
        SCHED_ID_ARINC653
    }

    fn init(&mut self) -> SysResult<()> {
        let mut schedule = Vec::new();
        schedule.try_reserve_exact(1)?;
        schedule.push(Slot {
            entry: ScheduleEntry {
                dom_handle: DomainHandle::SYSTEM,
                vcpu_id: 0,
                runtime: DEFAULT_TIMESLICE,
            },
            vc: None,
        });
        self.schedule = schedule;
        self.major_frame = DEFAULT_TIMESLICE;
        self.next_major_frame = 0;
        Ok(())
    }

    fn deinit(&mut self) {
        self.schedule.clear();
        self.vcpu_list.clear();
    }

    fn alloc_pdata(&mut self, cpu: CpuId) -> SysResult<Option<SchedPriv>> {
        self.cpus.set(cpu);
        Ok(None)
    }

    fn free_pdata(&mut self, _pdata: Option<SchedPriv>, cpu: CpuId) {
        self.cpus.clear(cpu);
    }

    fn alloc_vdata(
        &mut self,
        vcpu: &Arc<Vcpu>,
        _dom_priv: Option<&SchedPriv>,
    ) -> SysResult<Option<SchedPriv>> {
        let avcpu = Arc::new(A653Vcpu {
            vcpu: Arc::downgrade(vcpu),
            awake: AtomicBool::new(false),
        });

        // A VCPU idle não entra na lista: a tabela nunca a referencia.
        if !vcpu.is_idle() {
            self.vcpu_list.try_reserve(1)?;
            self.vcpu_list.push(avcpu.clone());
            self.update_schedule_vcpus();
        }

        Ok(Some(Box::new(avcpu)))
    }

    fn free_vdata(&mut self, vdata: Option<SchedPriv>) {
        let Some(avcpu) = vdata.and_then(|p| p.downcast::<Arc<A653Vcpu>>().ok()) else {
            return;
        };
        self.vcpu_list.retain(|a| !Arc::ptr_eq(a, &*avcpu));
        self.update_schedule_vcpus();
    }

    fn sleep(&mut self, vcpu: &Vcpu) {
        if let Some(a) = Self::avcpu_of(vcpu) {
            a.awake.store(false, Ordering::Release);
        }
    }

    fn wake(&mut self, vcpu: &Vcpu) {
        if let Some(a) = Self::avcpu_of(vcpu) {
            a.awake.store(true, Ordering::Release);
        }
    }

    fn do_schedule(&mut self, cpu: CpuId, now: STime, tasklet_work_scheduled: bool) -> TaskSlice {
        let n_entries = self.schedule.len();

        if now >= self.next_major_frame {
            // Frame novo (sempre na primeira chamada)
            self.sched_index = 0;
            self.next_major_frame = now + self.major_frame;
            self.next_switch_time = now + self.runtime_at(0);
        } else {
            while now >= self.next_switch_time && self.sched_index < n_entries {
                self.sched_index += 1;
                self.next_switch_time += self.runtime_at(self.sched_index);
            }
        }

        // Acabaram as entradas: idle até o fim do frame.
        if self.sched_index >= n_entries {
            self.next_switch_time = self.next_major_frame;
        }

        let mut task = self
            .schedule
            .get(self.sched_index)
            .and_then(|s| s.vc.as_ref())
            .filter(|a| a.awake.load(Ordering::Acquire))
            .and_then(|a| a.vcpu.upgrade())
            .filter(|v| v.is_runnable() && v.processor() == cpu);

        crate::bug_on!(
            now >= self.next_major_frame,
            "(A653) major frame perdido"
        );

        // Trabalho de tasklet roda no contexto idle e tem prioridade.
        if tasklet_work_scheduled {
            task = None;
        }

        let slice = TaskSlice {
            task,
            time: self.next_switch_time - now,
            migrated: false,
        };
        crate::bug_on!(slice.time <= 0, "(A653) fatia de tempo não positiva");
        slice
    }

    fn pick_cpu(&mut self, vcpu: &Vcpu) -> CpuId {
        let cpu = vcpu.processor();
        if self.cpus.test(cpu) {
            cpu
        } else {
            self.cpus.first().unwrap_or(0)
        }
    }

    fn adjust_global(
        &mut self,
        op: SchedulerOp<GlobalParams>,
        now: STime,
    ) -> SysResult<Option<GlobalParams>> {
        match op {
            SchedulerOp::PutInfo(GlobalParams::Arinc653(table)) => {
                self.set(&table, now)?;
                Ok(None)
            }
            SchedulerOp::GetInfo => Ok(Some(GlobalParams::Arinc653(self.get()))),
        }
    }

    fn dump_settings(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "major_frame={}us entries={}",
            self.major_frame / 1000,
            self.schedule.len()
        )?;
        for (i, s) in self.schedule.iter().enumerate() {
            let h = &s.entry.dom_handle.0;
            writeln!(
                out,
                "  [{:02}] dom={:02x}{:02x}{:02x}{:02x}.. vcpu={} runtime={}us{}",
                i,
                h[0],
                h[1],
                h[2],
                h[3],
                s.entry.vcpu_id,
                s.entry.runtime / 1000,
                if s.vc.is_some() { "" } else { " (unresolved)" }
            )?;
        }
        Ok(())
    }

    fn dump_cpu_state(&self, out: &mut dyn fmt::Write, cpu: CpuId) -> fmt::Result {
        writeln!(
            out,
            "  a653 cpu{}: index={} next_switch={} next_frame={}",
            cpu, self.sched_index, self.next_switch_time, self.next_major_frame
        )
    }
}
