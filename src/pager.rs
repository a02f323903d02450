//! Fault resolution workers.
//!
//! Each pager takes one request at a time and walks it through
//! select -> evict -> (swap out) -> load or zero -> publish. Every fatal
//! error along the way halts the whole subsystem.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use disk::BackingStore;
use log::{debug, info};
use memory::{AccessBits, Mmu, Protection};

use crate::{
    clock,
    fault::{Dispatch, FaultRequest},
    frame_table::FrameOwner,
    page_table::Residency,
    stats::Counters,
    vm::inner::VmCore,
    Pid, Result, VmError,
};

/// A victim taken out of its frame.
#[derive(Debug, Clone, Copy)]
struct Eviction {
    owner: FrameOwner,
    /// Swap block the contents must reach before the frame is reused.
    writeback: Option<usize>,
}

pub(crate) struct Pager<M, S> {
    id: usize,
    core: Arc<VmCore<M, S>>,
    buffer: Vec<u8>,
}

impl<M: Mmu + 'static, S: BackingStore + 'static> Pager<M, S> {
    pub fn spawn(id: usize, core: Arc<VmCore<M, S>>) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("pager-{}", id))
            .spawn(move || {
                let buffer = vec![0; core.page_size];
                Pager { id, core, buffer }.run()
            })
            .map_err(VmError::Spawn)
    }

    fn run(mut self) {
        info!("pager {} started", self.id);
        loop {
            let request = match self.core.faults.next() {
                Dispatch::Request(request) => request,
                Dispatch::Dropped => continue,
                Dispatch::Released => break,
            };
            let reply = match self.service(&request) {
                Ok(()) => Ok(()),
                Err(err) => Err(VmError::Halted(self.core.halt(&err))),
            };
            // The faulting side only goes away with the whole subsystem.
            let _ = request.reply.send(reply);
        }
        info!("pager {} exiting", self.id);
    }

    fn service(&mut self, request: &FaultRequest) -> Result<()> {
        let page = request.offset / self.core.page_size;
        assert!(
            page < self.core.config.pages,
            "fault for page {} outside the {}-page region",
            page,
            self.core.config.pages
        );
        debug!(
            "pager {}: pid {} page {} faulted",
            self.id, request.pid, page
        );

        if self.core.page_tables.get(request.pid).entry(page).is_resident() {
            debug!(
                "pager {}: pid {} page {} already resident",
                self.id, request.pid, page
            );
            return Ok(());
        }

        let (frame, eviction) = self.select_frame()?;
        if let Some(eviction) = eviction {
            self.swap_out(frame, eviction)?;
        }
        self.load_or_zero(request.pid, page, frame)?;
        self.publish(request.pid, page, frame)
    }

    /// Chooses a frame and, if it is occupied, detaches the occupant.
    ///
    /// Runs on the CPU so the victim's owner can neither touch the page nor be
    /// switched back in with it mapped once it is chosen.
    fn select_frame(&mut self) -> Result<(usize, Option<Eviction>)> {
        let core = &self.core;
        let cpu = core.cpu.lock().unwrap();
        let selection = clock::select_frame(&core.frames, core.mmu.as_ref())?;
        let frame = selection.frame;
        debug!(
            "pager {}: frame {} chosen, {} examined",
            self.id, frame, selection.examined
        );

        let owner = match core.frames.owner(frame) {
            Some(owner) => owner,
            None => {
                Counters::drop_one(&core.counters.free_frames);
                return Ok((frame, None));
            }
        };

        match self.detach(cpu.current, frame, owner) {
            Ok(eviction) => Ok((frame, Some(eviction))),
            Err(err) => {
                // The victim stays where it is.
                core.frames.unreserve(frame);
                Err(err)
            }
        }
    }

    /// Takes `owner` out of the reserved `frame`, choosing the swap block its
    /// contents go to when they are dirty.
    fn detach(&self, current: Option<Pid>, frame: usize, owner: FrameOwner) -> Result<Eviction> {
        let core = &self.core;
        let bits = core.mmu.access_bits(frame)?;
        let table = core.page_tables.get(owner.pid);
        let dirty = core.frames.entry(frame).dirty || bits.contains(AccessBits::DIRTY);
        let writeback = if dirty {
            match table.entry(owner.page).swap_block {
                Some(block) => Some(block),
                None => Some(core.swap.allocate()?),
            }
        } else {
            None
        };
        if current == Some(owner.pid) {
            core.mmu.unmap_page(owner.page)?;
        }
        core.frames.evict(frame, bits);
        table.unbind(owner.page, frame, writeback);
        Counters::bump(&core.counters.replaced);
        debug!(
            "pager {}: evicting pid {} page {} from frame {} ({})",
            self.id,
            owner.pid,
            owner.page,
            frame,
            if dirty { "dirty" } else { "clean" }
        );
        Ok(Eviction { owner, writeback })
    }

    fn swap_out(&mut self, frame: usize, eviction: Eviction) -> Result<()> {
        let block = match eviction.writeback {
            Some(block) => block,
            None => return Ok(()),
        };
        let table = self.core.page_tables.get(eviction.owner.pid);
        let written = self
            .core
            .mmu
            .read_frame(frame, &mut self.buffer)
            .map_err(VmError::from)
            .and_then(|_| {
                self.core
                    .store
                    .write_block(block, &self.buffer)
                    .map_err(VmError::device("page out"))
            });
        table.end_writeback(eviction.owner.page);
        written?;
        Counters::bump(&self.core.counters.page_outs);
        debug!(
            "pager {}: pid {} page {} written to block {}",
            self.id, eviction.owner.pid, eviction.owner.page, block
        );
        Ok(())
    }

    fn load_or_zero(&mut self, pid: Pid, page: usize, frame: usize) -> Result<()> {
        let entry = self.core.page_tables.get(pid).wait_writeback(page);
        // Only this request can make the page resident; a pid has one fault
        // outstanding at a time.
        assert!(
            !entry.is_resident(),
            "pid {} page {} became resident under its own fault",
            pid,
            page
        );
        match entry.swap_block {
            Some(block) => {
                let contents = self
                    .core
                    .store
                    .read_block(block)
                    .map_err(VmError::device("page in"))?;
                self.core.mmu.write_frame(frame, &contents)?;
                Counters::bump(&self.core.counters.page_ins);
                debug!(
                    "pager {}: pid {} page {} read from block {}",
                    self.id, pid, page, block
                );
            }
            None => {
                self.buffer.fill(0);
                self.core.mmu.write_frame(frame, &self.buffer)?;
                if entry.residency == Residency::Unreferenced {
                    Counters::bump(&self.core.counters.new);
                }
            }
        }
        Ok(())
    }

    fn publish(&mut self, pid: Pid, page: usize, frame: usize) -> Result<()> {
        let core = &self.core;
        let cpu = core.cpu.lock().unwrap();
        core.mmu.set_access_bits(frame, AccessBits::empty())?;
        core.page_tables.get(pid).bind(page, frame);
        core.frames.bind(frame, FrameOwner { pid, page });
        if cpu.current == Some(pid) {
            core.mmu.map_page(page, frame, Protection::READ_WRITE)?;
        }
        debug!("pager {}: pid {} page {} now in frame {}", self.id, pid, page, frame);
        Ok(())
    }
}
