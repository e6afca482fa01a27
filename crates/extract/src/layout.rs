use canon_ir::Bounds;
use std::collections::HashSet;

/// Lower-snake identifier derived from a label, unique within `used`.
pub(crate) fn unique_id(label: &str, used: &mut HashSet<String>) -> String {
    let mut base = String::with_capacity(label.len());
    let mut last_underscore = false;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            base.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            base.push('_');
            last_underscore = true;
        }
    }
    let mut base: String = base.trim_matches('_').chars().take(30).collect();
    if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
        base = format!("n_{base}");
    }
    let mut candidate = base.clone();
    let mut counter = 1;
    while used.contains(&candidate) {
        candidate = format!("{base}_{counter}");
        counter += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Containment analysis: a region holding at least two others, each under
/// two thirds of its area, is a group. Returns `(is_group, parent)` where
/// `parent[i]` is the smallest group strictly containing region `i`.
pub(crate) fn containment(bounds: &[Bounds]) -> (Vec<bool>, Vec<Option<usize>>) {
    let encloses = |outer: usize, inner: usize| {
        outer != inner
            && bounds[outer].contains(&bounds[inner])
            && bounds[outer].area() > bounds[inner].area() * 1.5
    };

    let is_group: Vec<bool> = (0..bounds.len())
        .map(|i| (0..bounds.len()).filter(|&j| encloses(i, j)).count() >= 2)
        .collect();

    let parent = (0..bounds.len())
        .map(|j| {
            (0..bounds.len())
                .filter(|&i| is_group[i] && encloses(i, j))
                .min_by(|&a, &b| bounds[a].area().total_cmp(&bounds[b].area()))
        })
        .collect();

    (is_group, parent)
}

pub(crate) fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Shortest distance from `p` to the segment `a`-`b`
pub(crate) fn segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return distance(p, a);
    }
    let t = (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0);
    distance(p, (a.0 + t * dx, a.1 + t * dy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_are_sanitized_and_unique() {
        let mut used = HashSet::new();
        assert_eq!(unique_id("API Gateway", &mut used), "api_gateway");
        assert_eq!(unique_id("API  Gateway!", &mut used), "api_gateway_1");
        assert_eq!(unique_id("3rd party", &mut used), "n_3rd_party");
        assert_eq!(unique_id("***", &mut used), "n_");
    }

    #[test]
    fn regions_holding_two_others_become_groups() {
        let bounds = vec![
            Bounds::new(0.0, 0.0, 300.0, 200.0),
            Bounds::new(10.0, 10.0, 50.0, 30.0),
            Bounds::new(100.0, 10.0, 50.0, 30.0),
            Bounds::new(400.0, 10.0, 50.0, 30.0),
        ];
        let (is_group, parent) = containment(&bounds);
        assert_eq!(is_group, vec![true, false, false, false]);
        assert_eq!(parent, vec![None, Some(0), Some(0), None]);
    }

    #[test]
    fn segment_distance_clamps_to_endpoints() {
        assert_eq!(segment_distance((5.0, 3.0), (0.0, 0.0), (10.0, 0.0)), 3.0);
        assert_eq!(segment_distance((13.0, 4.0), (0.0, 0.0), (10.0, 0.0)), 5.0);
    }
}
