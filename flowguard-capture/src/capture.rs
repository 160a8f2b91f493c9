use tracing::{debug, error};

use crate::cancel::CancelToken;
use crate::error::CaptureError;
use crate::packet::Packet;
use crate::source::PacketSource;

/// How a capture loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureExit {
    /// The source ran out of packets.
    Finished,
    /// Cancellation was observed.
    Stopped,
    /// The source failed mid-capture.
    Failed(String),
}

/// Run a capture loop over an opened source.
///
/// Blocks until the source is exhausted, fails, or `cancel` is set. The flag
/// is checked after every packet and after every read timeout, so a packet
/// that is already being handled always completes before the loop breaks.
pub fn run_capture_loop<F>(
    source: &mut dyn PacketSource,
    cancel: &CancelToken,
    mut callback: F,
) -> CaptureExit
where
    F: FnMut(&Packet),
{
    let mut packets = 0u64;
    loop {
        if cancel.is_cancelled() {
            debug!(packets, "break packet loop");
            return CaptureExit::Stopped;
        }
        match source.next_packet() {
            Ok(Some(packet)) => {
                packets += 1;
                callback(&packet);
            }
            Ok(None) => continue,
            Err(CaptureError::Exhausted) => {
                debug!(packets, "capture source exhausted");
                return CaptureExit::Finished;
            }
            Err(e) => {
                error!("Error capturing packet: {e}");
                return CaptureExit::Failed(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryEnd, MemorySource};

    fn packets(n: usize) -> Vec<Packet> {
        (0..n).map(|i| Packet::new(vec![i as u8; 4], i as i64)).collect()
    }

    struct FailingSource;

    impl PacketSource for FailingSource {
        fn next_packet(&mut self) -> Result<Option<Packet>, CaptureError> {
            Err(CaptureError::Read("link down".into()))
        }
    }

    #[test]
    fn runs_until_exhausted() {
        let mut source = MemorySource::new(packets(3), MemoryEnd::Exhausted);
        let mut seen = 0;
        let exit = run_capture_loop(&mut source, &CancelToken::new(), |_| seen += 1);
        assert_eq!(exit, CaptureExit::Finished);
        assert_eq!(seen, 3);
    }

    #[test]
    fn cancellation_takes_effect_after_current_packet() {
        let mut source = MemorySource::new(packets(3), MemoryEnd::Exhausted);
        let cancel = CancelToken::new();
        let mut seen = Vec::new();
        let exit = run_capture_loop(&mut source, &cancel, |p| {
            seen.push(p.timestamp_us);
            cancel.cancel();
        });
        assert_eq!(exit, CaptureExit::Stopped);
        assert_eq!(seen, vec![0]);
    }

    #[test]
    fn idle_source_observes_cancellation() {
        let mut source = MemorySource::new(Vec::new(), MemoryEnd::Idle);
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(30));
            remote.cancel();
        });
        let exit = run_capture_loop(&mut source, &cancel, |_| {});
        stopper.join().unwrap();
        assert_eq!(exit, CaptureExit::Stopped);
    }

    #[tracing_test::traced_test]
    #[test]
    fn read_errors_end_the_loop() {
        let exit = run_capture_loop(&mut FailingSource, &CancelToken::new(), |_| {});
        assert!(matches!(exit, CaptureExit::Failed(msg) if msg.contains("link down")));
        assert!(logs_contain("Error capturing packet"));
    }
}
