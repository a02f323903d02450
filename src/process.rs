use disk::BackingStore;
use memory::{Mmu, MmuError};

use crate::{vm::PagingSystem, Pid, Result, VmError};

/// A user process running in the paged region.
///
/// Accesses are split at page boundaries. A miss is handed to the pagers and
/// the access is retried once the page is resident, the way a faulting
/// instruction is restarted.
pub struct Process<'a, M: Mmu + 'static, S: BackingStore + 'static> {
    system: &'a PagingSystem<M, S>,
    pid: Pid,
}

impl<'a, M: Mmu + 'static, S: BackingStore + 'static> Process<'a, M, S> {
    pub(crate) fn new(system: &'a PagingSystem<M, S>, pid: Pid) -> Self {
        Process { system, pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let page_size = self.system.page_size();
        let mut done = 0;
        while done < buf.len() {
            let at = offset + done;
            let len = (page_size - at % page_size).min(buf.len() - done);
            let chunk = &mut buf[done..done + len];
            self.access(|mmu| mmu.read(at, chunk))?;
            done += len;
        }
        Ok(())
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let page_size = self.system.page_size();
        let mut done = 0;
        while done < data.len() {
            let at = offset + done;
            let len = (page_size - at % page_size).min(data.len() - done);
            let chunk = &data[done..done + len];
            self.access(|mmu| mmu.write(at, chunk))?;
            done += len;
        }
        Ok(())
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        let mut byte = [0];
        self.read(offset, &mut byte)?;
        Ok(byte[0])
    }

    pub fn write_u8(&self, offset: usize, value: u8) -> Result<()> {
        self.write(offset, &[value])
    }

    /// Ends the process and gives its frames and swap blocks back.
    pub fn exit(self) -> Result<()> {
        self.system.terminate(self.pid)
    }

    fn access<T>(
        &self,
        mut access: impl FnMut(&M) -> std::result::Result<T, MmuError>,
    ) -> Result<T> {
        loop {
            let core = self.system.core().ok_or(VmError::NotStarted)?;
            match core.user_access(self.pid, &mut access) {
                Err(VmError::Mmu(MmuError::Fault { offset })) => {
                    core.handle_fault(self.pid, offset)?
                }
                other => return other,
            }
        }
    }
}
