use super::Result;

/// Exact arithmetic that fails instead of wrapping.
///
/// Deployment arithmetic (node ids, realm/shard offsets, lease timings)
/// must never overflow silently.

pub fn add_exact(a: i64, b: i64) -> Result<i64> {
    a.checked_add(b)
        .ok_or_else(|| format_err!("integer overflow in {} + {}", a, b))
}

pub fn sub_exact(a: i64, b: i64) -> Result<i64> {
    a.checked_sub(b)
        .ok_or_else(|| format_err!("integer overflow in {} - {}", a, b))
}

pub fn mul_exact(a: i64, b: i64) -> Result<i64> {
    a.checked_mul(b)
        .ok_or_else(|| format_err!("integer overflow in {} * {}", a, b))
}

pub fn add_exact_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| format_err!("integer overflow in {} + {}", a, b))
}

pub fn mul_exact_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_mul(b)
        .ok_or_else(|| format_err!("integer overflow in {} * {}", a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_ops_succeed_in_range() {
        assert_eq!(add_exact(2, 3).unwrap(), 5);
        assert_eq!(sub_exact(2, 3).unwrap(), -1);
        assert_eq!(mul_exact(-4, 5).unwrap(), -20);
    }

    #[test]
    fn exact_ops_fail_on_overflow() {
        assert!(add_exact(i64::max_value(), 1).is_err());
        assert!(sub_exact(i64::min_value(), 1).is_err());
        assert!(mul_exact_u64(u64::max_value(), 2).is_err());
    }
}
