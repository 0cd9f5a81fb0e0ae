//! Exact cosine-similarity scan (spec §4.4 / Non-goals: no ANN structure
//! — the per-book corpus is small enough for a linear scan, matching
//! spec.md's explicit rejection of approximate-nearest-neighbor indexes
//! that the teacher's LanceDB-backed store would otherwise provide).

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
