//! Rendezvous between the roles of a job.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use super::completion::pipe;
use super::role::RoleContext;

/// Inbox of one party: every other party writes its index byte here.
#[derive(Debug)]
struct Inbox {
    reader: File,
    writer: File,
}

#[derive(Debug)]
struct Progress {
    generation: u64,
    /// Arrivals counted per sender across all generations
    arrivals: Vec<u64>,
}

#[derive(Debug)]
struct Shared {
    inboxes: Vec<Inbox>,
    progress: Mutex<Progress>,
}

/// Reusable N-party barrier for roles running in separate processes.
///
/// Must be created before the job is spawned so every worker inherits the
/// pipes. Each party passes through with its [`RoleContext`], whose index
/// selects its inbox. A party leaves a generation once it has seen that
/// generation's arrival from every peer, so the barrier can be reused
/// without a reset and early arrivals for the next generation are kept.
///
/// A waiting party holds the progress lock across its blocking pipe reads.
/// Only one party per process can wait at a time; a second party waiting
/// from the same process is rejected instead of deadlocking.
#[derive(Debug, Clone)]
pub struct RoleBarrier {
    shared: Arc<Shared>,
}

impl RoleBarrier {
    /// Creates a barrier for `parties` roles.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If a pipe cannot be created
    pub fn new(parties: usize) -> io::Result<Self> {
        let inboxes = (0..parties)
            .map(|_| pipe().map(|(reader, writer)| Inbox { reader, writer }))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            shared: Arc::new(Shared {
                inboxes,
                progress: Mutex::new(Progress {
                    generation: 0,
                    arrivals: vec![0; parties],
                }),
            }),
        })
    }

    /// Returns the number of parties.
    pub fn parties(&self) -> usize {
        self.shared.inboxes.len()
    }

    /// Blocks until every party reached the barrier.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If the role index is not a party, or a pipe fails or closes
    /// - `io::Error` of kind `Deadlock` - If another party of this process is waiting
    pub fn wait(&self, ctx: &RoleContext) -> io::Result<()> {
        let me = ctx.index;
        let parties = self.parties();
        if me >= parties {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("role {} is not one of {parties} barrier parties", ctx.name),
            ));
        }
        let token = u8::try_from(me)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "too many barrier parties"))?;

        let Some(mut progress) = self.shared.progress.try_lock() else {
            return Err(io::Error::new(
                ErrorKind::Deadlock,
                format!(
                    "role {} waits on a barrier another party of this process is blocked on",
                    ctx.name
                ),
            ));
        };
        progress.generation += 1;
        let generation = progress.generation;
        tracing::debug!(role = %ctx.name, generation, "arrived at barrier");

        for (peer, inbox) in self.shared.inboxes.iter().enumerate() {
            if peer != me {
                (&inbox.writer).write_all(&[token])?;
            }
        }

        let mut reader = &self.shared.inboxes[me].reader;
        let mut incoming = [0u8; 64];
        while (0..parties).any(|peer| peer != me && progress.arrivals[peer] < generation) {
            let n = match reader.read(&mut incoming) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "barrier pipe closed while waiting for peers",
                    ));
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            for &sender in &incoming[..n] {
                match progress.arrivals.get_mut(usize::from(sender)) {
                    Some(count) => *count += 1,
                    None => tracing::warn!(sender, "ignoring barrier token from unknown party"),
                }
            }
        }

        tracing::debug!(role = %ctx.name, generation, "leaving barrier");
        Ok(())
    }
}
