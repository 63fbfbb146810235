pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, PartialEq)]
pub struct RegionMatch {
    pub name: String,
    /// Similarity in [0, 1], 1 being an exact (case-insensitive) match.
    pub score: f64,
}

/// Find the candidate most similar to `query`.
///
/// Returns the best candidate regardless of how poor the match is, or None if there are no
/// candidates at all. Ties go to the earlier candidate.
pub fn best_match<S: AsRef<str>>(query: &str, candidates: &[S]) -> Option<RegionMatch> {
    let query = query.trim().to_lowercase();
    let mut best: Option<RegionMatch> = None;
    for candidate in candidates {
        let candidate = candidate.as_ref();
        let lowered = candidate.to_lowercase();
        if lowered == query {
            return Some(RegionMatch {
                name: candidate.to_string(),
                score: 1.0,
            });
        }
        let score = strsim::jaro_winkler(&query, &lowered);
        if best.as_ref().map_or(true, |best| score > best.score) {
            best = Some(RegionMatch {
                name: candidate.to_string(),
                score,
            });
        }
    }
    best
}

/// Resolve a free-text region name to a catalog name.
///
/// Returns None when no candidate reaches `threshold`. A threshold of 0.0 accepts the best
/// candidate whatever its score.
pub fn resolve_region_name<S: AsRef<str>>(
    query: &str,
    candidates: &[S],
    threshold: f64,
) -> Option<RegionMatch> {
    match best_match(query, candidates) {
        Some(found) if found.score >= threshold => Some(found),
        Some(found) => {
            log::debug!(
                "Best match for {:?} is {:?} with score {:.3}, below threshold {}",
                query,
                found.name,
                found.score,
                threshold
            );
            None
        }
        None => None,
    }
}
