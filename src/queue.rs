//! Kernel packet queue
//!
//! `PacketQueue` is the seam between the proxy and NFQUEUE. A message is
//! consumed by `verdict`, so it cannot be answered twice.

use anyhow::Result;

use crate::interceptor::Verdict;

pub trait PacketQueue {
    type Message;

    /// Start receiving packets redirected to `queue_num`.
    fn bind(&mut self, queue_num: u16) -> Result<()>;

    /// Next packet, or `None` if nothing arrived within the poll interval.
    fn recv(&mut self) -> Result<Option<Self::Message>>;

    fn payload<'a>(&self, message: &'a Self::Message) -> &'a [u8];

    fn verdict(&mut self, message: Self::Message, verdict: Verdict) -> Result<()>;

    /// Release the binding. Safe to call when not bound.
    fn unbind(&mut self) -> Result<()>;
}

#[cfg(target_os = "linux")]
pub use linux::NfQueue;

#[cfg(target_os = "linux")]
mod linux {
    use std::io::ErrorKind;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use nfq::{Message, Queue};
    use tracing::{debug, info};

    use super::PacketQueue;
    use crate::interceptor::Verdict;

    /// NFQUEUE netlink socket
    pub struct NfQueue {
        queue: Queue,
        bound: Option<u16>,
        poll_interval: Duration,
        fail_open: bool,
    }

    impl NfQueue {
        /// Open the netlink socket. Requires CAP_NET_ADMIN.
        pub fn open(poll_interval: Duration, fail_open: bool) -> Result<Self> {
            let mut queue = Queue::open().context("Failed to open NFQUEUE socket")?;
            // Non-blocking so the run loop can notice shutdown between packets
            queue.set_nonblocking(true);
            Ok(Self { queue, bound: None, poll_interval, fail_open })
        }
    }

    impl PacketQueue for NfQueue {
        type Message = Message;

        fn bind(&mut self, queue_num: u16) -> Result<()> {
            self.queue
                .bind(queue_num)
                .with_context(|| format!("Failed to bind to NFQUEUE {}", queue_num))?;
            if self.fail_open {
                // Accept instead of drop when the queue overflows
                self.queue
                    .set_fail_open(queue_num, true)
                    .with_context(|| format!("Failed to enable fail-open on NFQUEUE {}", queue_num))?;
            }
            self.bound = Some(queue_num);
            info!("Bound to NFQUEUE {}", queue_num);
            Ok(())
        }

        fn recv(&mut self) -> Result<Option<Message>> {
            match self.queue.recv() {
                Ok(message) => Ok(Some(message)),
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                    std::thread::sleep(self.poll_interval);
                    Ok(None)
                }
                Err(e) => Err(e).context("NFQUEUE recv failed"),
            }
        }

        fn payload<'a>(&self, message: &'a Message) -> &'a [u8] {
            message.get_payload()
        }

        fn verdict(&mut self, mut message: Message, verdict: Verdict) -> Result<()> {
            match verdict {
                Verdict::Accept => message.set_verdict(nfq::Verdict::Accept),
                Verdict::Replace(bytes) => {
                    message.set_payload(bytes);
                    message.set_verdict(nfq::Verdict::Accept);
                }
                Verdict::Drop => message.set_verdict(nfq::Verdict::Drop),
            }
            self.queue.verdict(message).context("Failed to send verdict")
        }

        fn unbind(&mut self) -> Result<()> {
            let Some(queue_num) = self.bound.take() else {
                debug!("NFQUEUE not bound, nothing to unbind");
                return Ok(());
            };
            self.queue
                .unbind(queue_num)
                .with_context(|| format!("Failed to unbind NFQUEUE {}", queue_num))?;
            info!("Unbound NFQUEUE {}", queue_num);
            Ok(())
        }
    }
}
