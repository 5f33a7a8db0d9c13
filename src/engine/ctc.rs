//! CTC greedy decoding primitives.

/// Collapse a CTC token-id sequence: drop blanks and deduplicate any token
/// equal to the immediately preceding token (emitted or skipped).
///
/// Single pass, order-preserving. Re-applying to an already collapsed,
/// blank-free sequence is a no-op.
pub fn ctc_collapse(token_ids: &[i64], blank_id: i64) -> Vec<i64> {
    let mut collapsed = Vec::with_capacity(token_ids.len());
    let mut previous: Option<i64> = None;
    for &token in token_ids {
        if token == blank_id {
            previous = Some(token);
            continue;
        }
        if previous != Some(token) {
            collapsed.push(token);
        }
        previous = Some(token);
    }
    collapsed
}

/// Per-timestep argmax over a row-major `[frames, classes]` score matrix.
pub fn argmax_frames(scores: &[f32], frames: usize, classes: usize) -> Vec<i64> {
    let mut token_ids = Vec::with_capacity(frames);
    for frame in scores.chunks_exact(classes).take(frames) {
        let mut best_id = 0usize;
        let mut best_val = f32::NEG_INFINITY;
        for (id, &val) in frame.iter().enumerate() {
            if val > best_val {
                best_val = val;
                best_id = id;
            }
        }
        token_ids.push(best_id as i64);
    }
    token_ids
}
