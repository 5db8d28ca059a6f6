//! Capture reports: a JSON summary of a download session and a
//! human-readable corruption dump.

use std::collections::HashMap;

use camlink::TransferSession;
use camlink::camera::Diagnosis;
use camlink::protocol::{Region, render_region};
use serde::Serialize;

/// Bytes of context shown either side of a corrupted region.
pub const REGION_CONTEXT: usize = 10;

/// Summary of one capture.
#[derive(Debug, Serialize)]
pub struct CaptureReport {
    /// Whether every packet validated.
    pub success: bool,
    /// Where the picture was written.
    pub output: Option<String>,
    /// Picture size announced by the camera.
    pub image_size: u32,
    /// Packet size used.
    pub package_size: u16,
    /// Number of packets.
    pub packets: u16,
    /// Rounds performed.
    pub rounds: u32,
    /// 1-based indices that never validated.
    pub missing: Vec<u16>,
    /// Receive overruns counted by the link.
    pub overruns: u64,
    /// Packets with at least one rejected observation.
    pub rejected: Vec<PacketReport>,
}

/// Rejected observations of one packet.
#[derive(Debug, Serialize)]
pub struct PacketReport {
    /// 1-based packet index.
    pub id: u16,
    /// Whether a valid copy was eventually received.
    pub valid: bool,
    /// One entry per rejected observation.
    pub faults: Vec<FaultReport>,
}

/// One rejected observation.
#[derive(Debug, Serialize)]
pub struct FaultReport {
    /// Round it was received in.
    pub round: u32,
    /// Why it was rejected.
    pub fault: String,
    /// Bytes received.
    pub len: usize,
    /// Divergent spans against the valid copy, when there is one.
    pub regions: Vec<Region>,
}

impl CaptureReport {
    /// Build a report from a finished or exhausted session.
    pub fn from_session(session: &TransferSession, output: Option<String>, overruns: u64) -> Self {
        let layout = session.layout();
        let diagnoses: HashMap<u16, Diagnosis> =
            session.diagnose().into_iter().map(|d| (d.id, d)).collect();

        let rejected = layout
            .ids()
            .filter_map(|id| {
                let faults: Vec<FaultReport> = session
                    .observations(id)
                    .iter()
                    .filter_map(|o| {
                        let fault = o.fault.as_ref()?;
                        let regions = diagnoses
                            .get(&id)
                            .and_then(|d| d.variants.iter().find(|v| v.round == o.round))
                            .map(|v| v.regions.clone())
                            .unwrap_or_default();
                        Some(FaultReport {
                            round: o.round,
                            fault: fault.to_string(),
                            len: o.raw.len(),
                            regions,
                        })
                    })
                    .collect();
                (!faults.is_empty()).then(|| PacketReport {
                    id,
                    valid: session.is_valid(id),
                    faults,
                })
            })
            .collect();

        let missing = session.missing();
        Self {
            success: missing.is_empty(),
            output,
            image_size: layout.image_size(),
            package_size: layout.package_size(),
            packets: layout.package_count(),
            rounds: session.rounds(),
            missing,
            overruns,
            rejected,
        }
    }
}

/// Render every localized corruption in `session` as text, one block per
/// rejected observation.
pub fn render_diagnostics(session: &TransferSession) -> String {
    let mut out = String::new();
    for diagnosis in session.diagnose() {
        for variant in &diagnosis.variants {
            out.push_str(&format!(
                "packet {} round {}: {}\n",
                diagnosis.id, variant.round, variant.fault
            ));
            for region in &variant.regions {
                out.push_str(&render_region(&diagnosis.good, *region, REGION_CONTEXT));
                out.push('\n');
            }
        }
    }
    for id in session.missing() {
        for o in session.observations(id) {
            if let Some(fault) = &o.fault {
                out.push_str(&format!(
                    "packet {id} round {}: {fault} (no valid copy)\n",
                    o.round
                ));
            }
        }
    }
    out
}
