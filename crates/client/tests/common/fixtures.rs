//! Spreadsheet fixtures.

use bytes::Bytes;
use hopper_client::PipelineEvent;
use tokio::sync::mpsc;

/// A worker roster whose header row sits below a title block.
///
/// Every `error_every`-th row has an empty `nombre`. Pass 0 for no bad rows.
#[allow(dead_code)]
pub fn roster_csv(rows: usize, error_every: usize) -> Bytes {
    let mut out = String::from("Worker roster,,\n,,\ncodigo,nombre,cargo\n");
    for i in 1..=rows {
        let name = if error_every > 0 && i % error_every == 0 {
            String::new()
        } else {
            format!("Worker {i}")
        };
        out.push_str(&format!("W-{i:05},{name},operator\n"));
    }
    Bytes::from(out)
}

/// A valid roster of exactly `len` bytes. Returns the data and its row count.
#[allow(dead_code)]
pub fn roster_csv_of_len(len: usize) -> (Bytes, u64) {
    const FILLER_PREFIX: &str = "W-99999,Filler,";
    let mut out = String::from("codigo,nombre,notas\n");
    let mut rows = 0u64;

    loop {
        let line = format!("W-{:05},Worker {},\n", rows + 1, rows + 1);
        if out.len() + line.len() + FILLER_PREFIX.len() + 2 > len {
            break;
        }
        out.push_str(&line);
        rows += 1;
    }

    let padding = len - out.len() - FILLER_PREFIX.len() - 1;
    out.push_str(FILLER_PREFIX);
    out.push_str(&"x".repeat(padding));
    out.push('\n');
    assert_eq!(out.len(), len);
    (Bytes::from(out), rows + 1)
}

/// Everything published on the event channel so far.
#[allow(dead_code)]
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[allow(dead_code)]
pub fn transfer_percents(events: &[PipelineEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::TransferProgress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

#[allow(dead_code)]
pub fn states(events: &[PipelineEvent]) -> Vec<hopper_client::PipelineState> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::State(state) => Some(*state),
            _ => None,
        })
        .collect()
}

#[test]
fn test_roster_csv_of_len_is_exact() {
    for len in [200, 5 * 1024, 12 * 1024] {
        let (data, rows) = roster_csv_of_len(len);
        assert_eq!(data.len(), len);
        assert_eq!(data.iter().filter(|b| **b == b'\n').count() as u64, rows + 1);
    }
}
