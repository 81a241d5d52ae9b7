use sha1::{Digest, Sha1};
use tile_bridge_core::message::Origin;
use tracing::debug;

/// Drops retransmitted frames and numbers fragments.
///
/// The capture side tags frames with a sequence number that repeats for retransmissions and for
/// fragments of one logical message. A lower number than the last one is a retransmission. The
/// same number with a known payload digest is a retransmission too. The same number with a new
/// digest is the next fragment.
#[derive(Debug, Default)]
pub struct FrameGate {
    last_seq: Option<u64>,
    digests: Vec<[u8; 20]>,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The origin to tag the decoded message with, or `None` for a duplicate.
    pub fn admit(&mut self, seq: u64, bytes: &[u8]) -> Option<Origin> {
        let digest: [u8; 20] = Sha1::digest(bytes).into();
        match self.last_seq {
            Some(last) if seq < last => {
                debug!("gate.duplicate seq={seq} last={last} reason=stale_seq");
                None
            }
            Some(last) if seq == last => {
                if self.digests.contains(&digest) {
                    debug!(
                        "gate.duplicate seq={seq} digest={} reason=same_digest",
                        hex::encode(&digest[..6])
                    );
                    return None;
                }
                let fragment = u16::try_from(self.digests.len()).unwrap_or(u16::MAX);
                self.digests.push(digest);
                debug!("gate.fragment seq={seq} fragment={fragment}");
                Some(Origin::new(seq, fragment))
            }
            _ => {
                self.last_seq = Some(seq);
                self.digests.clear();
                self.digests.push(digest);
                Some(Origin::new(seq, 0))
            }
        }
    }
}
