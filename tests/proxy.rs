//! Lifecycle tests: a `Proxy` driven by in-memory firewall and queue fakes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use modbus_intercept::checksum;
use modbus_intercept::testing::{self, SegmentConfig};
use modbus_intercept::{
    FirewallController, Interceptor, PacketQueue, Proxy, ProxyState, RedirectRule, Verdict,
};

#[derive(Default)]
struct FakeFirewall {
    calls: RefCell<Vec<String>>,
    fail_install: bool,
    fail_remove: bool,
}

impl FirewallController for FakeFirewall {
    fn install_redirect(&self, rule: &RedirectRule) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("install sport={} queue={}", rule.source_port, rule.queue_num));
        if self.fail_install {
            return Err(anyhow!("nft: permission denied"));
        }
        Ok(())
    }

    fn remove_redirect(&self) -> Result<()> {
        self.calls.borrow_mut().push("remove".to_string());
        if self.fail_remove {
            return Err(anyhow!("nft: chain busy"));
        }
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        self.calls.borrow_mut().push("flush".to_string());
        Ok(())
    }
}

struct FakeQueue {
    pending: VecDeque<(usize, Vec<u8>)>,
    verdicts: Vec<(usize, Verdict)>,
    bound: Option<u16>,
    bind_calls: usize,
    unbind_calls: usize,
    fail_bind: bool,
    fail_unbind: bool,
    /// Raise the shutdown flag when this packet is handed out
    cancel_at: Option<usize>,
    shutdown: Arc<AtomicBool>,
}

impl FakeQueue {
    fn new(packets: Vec<Vec<u8>>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            pending: packets.into_iter().enumerate().collect(),
            verdicts: Vec::new(),
            bound: None,
            bind_calls: 0,
            unbind_calls: 0,
            fail_bind: false,
            fail_unbind: false,
            cancel_at: None,
            shutdown,
        }
    }
}

impl PacketQueue for FakeQueue {
    type Message = (usize, Vec<u8>);

    fn bind(&mut self, queue_num: u16) -> Result<()> {
        self.bind_calls += 1;
        if self.fail_bind {
            return Err(anyhow!("bind: operation not permitted"));
        }
        self.bound = Some(queue_num);
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Self::Message>> {
        match self.pending.pop_front() {
            Some(message) => {
                if self.cancel_at == Some(message.0) {
                    self.shutdown.store(true, Ordering::Relaxed);
                }
                Ok(Some(message))
            }
            None => {
                // Nothing left: behave like an idle queue and end the test run
                self.shutdown.store(true, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    fn payload<'a>(&self, message: &'a Self::Message) -> &'a [u8] {
        &message.1
    }

    fn verdict(&mut self, message: Self::Message, verdict: Verdict) -> Result<()> {
        self.verdicts.push((message.0, verdict));
        Ok(())
    }

    fn unbind(&mut self) -> Result<()> {
        self.unbind_calls += 1;
        if self.fail_unbind {
            return Err(anyhow!("unbind: no such queue"));
        }
        self.bound = None;
        Ok(())
    }
}

fn redirect() -> RedirectRule {
    RedirectRule { source_port: 502, queue_num: 1 }
}

fn mixed_traffic() -> Vec<Vec<u8>> {
    vec![
        testing::read_holding_response(&testing::sequential_registers(12)),
        testing::read_holding_response(&[1, 2, 3, 4, 5]),
        testing::response_with_pdu(&[0x06, 0x00, 0x01, 0x00, 0x03]),
        vec![0x45, 0x00, 0x00],
        testing::empty_ack(),
        SegmentConfig::ipv6().register_response(0x03, &testing::sequential_registers(30)),
    ]
}

#[test]
fn test_every_packet_gets_one_verdict_in_order() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let packets = mixed_traffic();
    let queue = FakeQueue::new(packets.clone(), shutdown.clone());
    let mut proxy = Proxy::new(FakeFirewall::default(), queue, Interceptor::default(), redirect());

    proxy.start().unwrap();
    assert_eq!(proxy.state(), ProxyState::Running);
    proxy.run(&shutdown).unwrap();

    let verdicts = &proxy.queue().verdicts;
    let ids: Vec<usize> = verdicts.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);

    for (id, verdict) in verdicts {
        match (id, verdict) {
            (0 | 5, Verdict::Replace(bytes)) => {
                assert_eq!(bytes.len(), packets[*id].len());
                assert!(checksum::verify(bytes).unwrap().is_valid());
            }
            (1..=4, Verdict::Accept) => {}
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    let stats = proxy.stats();
    assert_eq!(stats.packets, 6);
    assert_eq!(stats.mutated, 2);
    assert_eq!(stats.unparsed, 1);

    assert!(proxy.shutdown().is_clean());
}

#[test]
fn test_cancellation_finishes_in_flight_packet() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let packets = vec![testing::read_holding_response(&testing::sequential_registers(12)); 4];
    let mut queue = FakeQueue::new(packets, shutdown.clone());
    queue.cancel_at = Some(1);

    let mut proxy = Proxy::new(FakeFirewall::default(), queue, Interceptor::default(), redirect());
    proxy.start().unwrap();
    proxy.run(&shutdown).unwrap();

    // Packet 1 was in flight when cancellation arrived: it still got its
    // verdict, nothing after it was pulled from the queue.
    let ids: Vec<usize> = proxy.queue().verdicts.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert!(matches!(proxy.queue().verdicts[1].1, Verdict::Replace(_)));
    assert_eq!(proxy.queue().pending.len(), 2);

    let report = proxy.shutdown();
    assert!(report.is_clean());
    assert_eq!(proxy.state(), ProxyState::Stopped);
    assert_eq!(proxy.queue().bound, None);
    assert_eq!(
        *proxy.firewall().calls.borrow(),
        vec!["install sport=502 queue=1", "remove", "flush"]
    );

    // Second teardown is a no-op without errors
    let again = proxy.shutdown();
    assert!(again.is_clean());
    assert_eq!(proxy.queue().unbind_calls, 1);
    assert_eq!(proxy.firewall().calls.borrow().len(), 3);
}

#[test]
fn test_install_failure_never_binds() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let queue = FakeQueue::new(vec![], shutdown);
    let firewall = FakeFirewall { fail_install: true, ..Default::default() };
    let mut proxy = Proxy::new(firewall, queue, Interceptor::default(), redirect());

    assert!(proxy.start().is_err());
    assert_eq!(proxy.state(), ProxyState::Stopped);
    assert_eq!(proxy.queue().bind_calls, 0);
}

#[test]
fn test_bind_failure_removes_rules() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut queue = FakeQueue::new(vec![], shutdown);
    queue.fail_bind = true;
    let mut proxy = Proxy::new(FakeFirewall::default(), queue, Interceptor::default(), redirect());

    assert!(proxy.start().is_err());
    assert_eq!(proxy.state(), ProxyState::Stopped);
    assert_eq!(
        *proxy.firewall().calls.borrow(),
        vec!["install sport=502 queue=1", "remove", "flush"]
    );
}

#[test]
fn test_teardown_continues_past_failures() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut queue = FakeQueue::new(vec![], shutdown.clone());
    queue.fail_unbind = true;
    let firewall = FakeFirewall { fail_remove: true, ..Default::default() };
    let mut proxy = Proxy::new(firewall, queue, Interceptor::default(), redirect());

    proxy.start().unwrap();
    proxy.run(&shutdown).unwrap();
    let report = proxy.shutdown();

    assert_eq!(report.failures.len(), 2);
    // flush still ran after unbind and remove failed
    assert_eq!(proxy.firewall().calls.borrow().last().map(String::as_str), Some("flush"));
    assert_eq!(proxy.state(), ProxyState::Stopped);
    assert!(proxy.shutdown().is_clean());
}

#[test]
fn test_run_requires_start() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let queue = FakeQueue::new(vec![], shutdown.clone());
    let mut proxy = Proxy::new(FakeFirewall::default(), queue, Interceptor::default(), redirect());

    assert!(proxy.run(&shutdown).is_err());
    // Never started: shutdown touches nothing
    assert!(proxy.shutdown().is_clean());
    assert!(proxy.firewall().calls.borrow().is_empty());
}

#[test]
fn test_pass_through_forwards_exact_bytes() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let packet = testing::read_holding_response(&testing::sequential_registers(11));
    let queue = FakeQueue::new(vec![packet], shutdown.clone());
    let mut proxy = Proxy::new(FakeFirewall::default(), queue, Interceptor::default(), redirect());

    proxy.start().unwrap();
    proxy.run(&shutdown).unwrap();
    assert_eq!(proxy.queue().verdicts, vec![(0, Verdict::Accept)]);
}
