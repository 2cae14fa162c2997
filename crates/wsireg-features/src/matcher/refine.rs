use super::coarse::CellMatch;
use super::descriptors::{cosine, Descriptors};
use super::params::MatchParams;

/// Carry matches from an outer (coarser) stage into the next finer one.
///
/// Every outer match spawns the `ratio x ratio` fixed cells it covers; each
/// child is searched in a window of `search_radius` cells around the moving
/// location predicted by the parent. Children whose best similarity is below
/// `min_similarity` are dropped.
pub(crate) fn refine_matches(
    parents: &[CellMatch],
    ratio: usize,
    fixed: &Descriptors,
    moving: &Descriptors,
    params: &MatchParams,
) -> Vec<CellMatch> {
    let r = params.search_radius;
    let mut out = Vec::with_capacity(parents.len() * ratio * ratio);

    for parent in parents {
        for dy in 0..ratio {
            for dx in 0..ratio {
                let fy = parent.fixed.0 * ratio + dy;
                let fx = parent.fixed.1 * ratio + dx;
                if fy >= fixed.height || fx >= fixed.width {
                    continue;
                }
                let py = (parent.moving.0 * ratio + dy).min(moving.height.saturating_sub(1));
                let px = (parent.moving.1 * ratio + dx).min(moving.width.saturating_sub(1));

                let f = fixed.at(fy, fx);
                let mut best: Option<(f32, (usize, usize))> = None;
                for my in py.saturating_sub(r)..(py + r + 1).min(moving.height) {
                    for mx in px.saturating_sub(r)..(px + r + 1).min(moving.width) {
                        let s = cosine(f, moving.at(my, mx));
                        if best.is_none_or(|(b, _)| s > b) {
                            best = Some((s, (my, mx)));
                        }
                    }
                }

                if let Some((similarity, m)) = best {
                    if similarity >= params.min_similarity {
                        out.push(CellMatch {
                            fixed: (fy, fx),
                            moving: m,
                            similarity,
                        });
                    }
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pyramid::FeatureMap;

    fn ramp_codes(n: usize, shift: usize) -> Descriptors {
        Descriptors::from_map(&FeatureMap::from_fn(n * n, n, n, |c, y, x| {
            let sx = (x + n - shift) % n;
            if c == y * n + sx {
                1.0
            } else {
                0.0
            }
        }))
    }

    #[test]
    fn children_follow_local_offset() {
        let fixed = ramp_codes(4, 0);
        let moving = ramp_codes(4, 1);
        let parent = CellMatch {
            fixed: (0, 0),
            moving: (0, 0),
            similarity: 1.0,
        };
        let params = MatchParams {
            min_similarity: 0.9,
            search_radius: 1,
            ..MatchParams::default()
        };
        let kids = refine_matches(&[parent], 2, &fixed, &moving, &params);
        assert_eq!(kids.len(), 4);
        for k in &kids {
            assert_eq!(k.moving, (k.fixed.0, k.fixed.1 + 1));
        }
    }

    #[test]
    fn window_bounds_the_search() {
        let fixed = ramp_codes(4, 0);
        let moving = ramp_codes(4, 2);
        let parent = CellMatch {
            fixed: (0, 0),
            moving: (0, 0),
            similarity: 1.0,
        };
        let params = MatchParams {
            min_similarity: 0.9,
            search_radius: 1,
            ..MatchParams::default()
        };
        // every child needs a two-column jump
        assert!(refine_matches(&[parent], 2, &fixed, &moving, &params).is_empty());

        let wider = MatchParams {
            search_radius: 2,
            ..params
        };
        let kids = refine_matches(&[parent], 2, &fixed, &moving, &wider);
        assert_eq!(kids.len(), 4);
        assert!(kids.iter().all(|k| k.moving.1 == k.fixed.1 + 2));
    }
}
