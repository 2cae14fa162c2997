use super::descriptors::{cosine, Descriptors};
use super::params::MatchParams;

/// Correspondence between two cells of the same stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct CellMatch {
    pub fixed: (usize, usize),
    pub moving: (usize, usize),
    pub similarity: f32,
}

#[inline]
fn chebyshev(a: (usize, usize), b: (usize, usize)) -> usize {
    a.0.abs_diff(b.0).max(a.1.abs_diff(b.1))
}

/// All-to-all search on the coarsest stage.
///
/// Returned matches are sorted by decreasing margin and capped at
/// `max_coarse_matches`.
pub(crate) fn coarse_matches(
    fixed: &Descriptors,
    moving: &Descriptors,
    params: &MatchParams,
) -> Vec<CellMatch> {
    let n_moving = moving.len();
    if fixed.len() == 0 || n_moving == 0 {
        return Vec::new();
    }

    let mut scores = vec![0.0f32; n_moving];
    let mut col_best = vec![(f32::NEG_INFINITY, usize::MAX); n_moving];
    // (fixed idx, moving idx, similarity, margin)
    let mut candidates: Vec<(usize, usize, f32, f32)> = Vec::new();

    for fi in 0..fixed.len() {
        let f = fixed.cell(fi);
        let mut best = (f32::NEG_INFINITY, 0usize);
        for (mi, score) in scores.iter_mut().enumerate() {
            let s = cosine(f, moving.cell(mi));
            *score = s;
            if s > best.0 {
                best = (s, mi);
            }
            if s > col_best[mi].0 {
                col_best[mi] = (s, fi);
            }
        }

        let (best_score, best_mi) = best;
        if best_score < params.min_similarity {
            continue;
        }
        let best_cell = (best_mi / moving.width, best_mi % moving.width);
        let runner_up = scores
            .iter()
            .enumerate()
            .filter(|&(mi, _)| {
                chebyshev((mi / moving.width, mi % moving.width), best_cell)
                    > params.exclusion_radius
            })
            .map(|(_, &s)| s)
            .fold(-1.0f32, f32::max);
        let margin = best_score - runner_up;
        if margin < params.min_margin {
            continue;
        }
        candidates.push((fi, best_mi, best_score, margin));
    }

    if params.mutual_check {
        candidates.retain(|&(fi, mi, _, _)| col_best[mi].1 == fi);
    }
    candidates.sort_by(|a, b| b.3.total_cmp(&a.3));
    if let Some(cap) = params.max_coarse_matches {
        candidates.truncate(cap);
    }

    log::debug!(
        "coarse search: {} of {} fixed cells matched",
        candidates.len(),
        fixed.len()
    );

    candidates
        .into_iter()
        .map(|(fi, mi, similarity, _)| CellMatch {
            fixed: (fi / fixed.width, fi % fixed.width),
            moving: (mi / moving.width, mi % moving.width),
            similarity,
        })
        .collect()
}
