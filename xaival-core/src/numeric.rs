//! Numeric helpers shared by the metrics.
//!
//! Relative changes use a floored denominator: any component with magnitude
//! below `eps` is replaced by `eps` carrying the component's sign, and zero
//! becomes `+eps`. Ratio denominators are floored at `eps` via [`floor_eps`].

/// L_p norm of a vector. `p = f64::INFINITY` gives the max-abs norm.
pub fn lp_norm(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if p.is_infinite() {
        return values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    }
    if (p - 1.0).abs() < f64::EPSILON {
        return values.iter().map(|v| v.abs()).sum();
    }
    if (p - 2.0).abs() < f64::EPSILON {
        return values.iter().map(|v| v * v).sum::<f64>().sqrt();
    }
    values
        .iter()
        .map(|v| v.abs().powf(p))
        .sum::<f64>()
        .powf(1.0 / p)
}

/// L_p distance between two equally sized vectors.
pub fn lp_distance(a: &[f64], b: &[f64], p: f64) -> f64 {
    let diff: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    lp_norm(&diff, p)
}

/// Replace a near-zero denominator with `eps`, keeping its sign.
pub fn stable_denominator(value: f64, eps: f64) -> f64 {
    if value.abs() >= eps {
        value
    } else if value < 0.0 {
        -eps
    } else {
        eps
    }
}

/// Floor a non-negative magnitude at `eps`.
pub fn floor_eps(value: f64, eps: f64) -> f64 {
    value.max(eps)
}

/// Elementwise `(reference - other) / reference` with the stable-denominator policy.
pub fn relative_change(reference: &[f64], other: &[f64], eps: f64) -> Vec<f64> {
    reference
        .iter()
        .zip(other)
        .map(|(r, o)| (r - o) / stable_denominator(*r, eps))
        .collect()
}

/// Index of the largest value, ties to the lowest index. `None` for an empty slice.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Average (fractional) ranks, 1-based. Tied values share the mean of their ranks.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end are tied; ranks are 1-based.
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Pearson correlation. Returns 0.0 when either input has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean_a = a[..n].iter().sum::<f64>() / nf;
    let mean_b = b[..n].iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }
    cov / denom
}

/// Spearman rank correlation (Pearson over average ranks).
pub fn spearman(a: &[f64], b: &[f64]) -> f64 {
    pearson(&average_ranks(a), &average_ranks(b))
}

/// Arithmetic mean. Returns 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lp_norm_orders() {
        let v = [3.0, -4.0];
        assert!((lp_norm(&v, 1.0) - 7.0).abs() < 1e-12);
        assert!((lp_norm(&v, 2.0) - 5.0).abs() < 1e-12);
        assert!((lp_norm(&v, f64::INFINITY) - 4.0).abs() < 1e-12);
        assert!((lp_norm(&v, 3.0) - (27.0_f64 + 64.0).powf(1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_stable_denominator_keeps_sign() {
        assert_eq!(stable_denominator(0.0, 1e-4), 1e-4);
        assert_eq!(stable_denominator(-1e-6, 1e-4), -1e-4);
        assert_eq!(stable_denominator(2.0, 1e-4), 2.0);
    }

    #[test]
    fn test_relative_change_with_zero_reference_is_finite() {
        let change = relative_change(&[0.0, 2.0], &[1.0, 1.0], 1e-4);
        assert!(change.iter().all(|c| c.is_finite()));
        assert!((change[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_average_ranks_with_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 10.0, 30.0]), vec![1.5, 3.0, 1.5, 4.0]);
    }

    #[test]
    fn test_spearman_monotone() {
        assert!((spearman(&[1.0, 2.0, 3.0], &[10.0, 200.0, 3000.0]) - 1.0).abs() < 1e-12);
        assert!((spearman(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) + 1.0).abs() < 1e-12);
        assert_eq!(spearman(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_average_ranks_orders_nan_last() {
        assert_eq!(average_ranks(&[3.0, f64::NAN, 1.0]), vec![2.0, 3.0, 1.0]);
    }

    #[test]
    fn test_argmax_ties_to_first() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
