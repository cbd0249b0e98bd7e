//! Maximal Marginal Relevance re-ranking.

use crate::store::RetrievalCandidate;

/// Cosine similarity `dot(u, v) / (|u| * |v|)`; zero when either vector has no magnitude.
pub fn cosine_similarity(u: &[f32], v: &[f32]) -> f32 {
    let dot: f32 = u.iter().zip(v).map(|(a, b)| a * b).sum();
    let norm_u = u.iter().map(|a| a * a).sum::<f32>().sqrt();
    let norm_v = v.iter().map(|b| b * b).sum::<f32>().sqrt();
    if norm_u == 0.0 || norm_v == 0.0 {
        return 0.0;
    }
    dot / (norm_u * norm_v)
}

/// Pick up to `k` candidates trading relevance against redundancy.
///
/// The lowest-distance candidate is always selected first. Each following pick maximizes
/// `(1 - lambda) * (-distance) - lambda * max_sim`, where `max_sim` is the highest cosine
/// similarity to anything already picked. Ties go to the earliest candidate in input order.
pub fn select_diverse(
    candidates: Vec<RetrievalCandidate>,
    k: usize,
    lambda: f32,
) -> Vec<RetrievalCandidate> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }

    let mut remaining: Vec<Option<RetrievalCandidate>> = candidates.into_iter().map(Some).collect();
    let target = k.min(remaining.len());
    let mut selected: Vec<RetrievalCandidate> = Vec::with_capacity(target);

    let seed = remaining
        .iter()
        .enumerate()
        .filter_map(|(idx, slot)| slot.as_ref().map(|candidate| (idx, candidate.distance)))
        .fold(None, |best: Option<(usize, f32)>, (idx, distance)| match best {
            Some((_, best_distance)) if best_distance <= distance => best,
            _ => Some((idx, distance)),
        });
    if let Some(candidate) = seed.and_then(|(idx, _)| remaining[idx].take()) {
        selected.push(candidate);
    }

    while selected.len() < target {
        let mut best: Option<(usize, f32)> = None;
        for (idx, slot) in remaining.iter().enumerate() {
            let Some(candidate) = slot else { continue };
            let max_similarity = selected
                .iter()
                .map(|chosen| cosine_similarity(&candidate.vector, &chosen.vector))
                .fold(f32::NEG_INFINITY, f32::max);
            let score = (1.0 - lambda) * -candidate.distance - lambda * max_similarity;
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((idx, score));
            }
        }

        match best.and_then(|(idx, _)| remaining[idx].take()) {
            Some(candidate) => selected.push(candidate),
            None => break,
        }
    }

    selected
}
