// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Generators for client addresses and forwarding headers.

/// Generate `count` distinct documentation-range IPv4 addresses.
pub fn generate_ips(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("198.51.{}.{}", (i / 250) % 250, (i % 250) + 1))
        .collect()
}

/// `X-Forwarded-For` value where the client forged `forged` entries and the
/// trusted proxy appended `real`.
pub fn spoofed_chain(forged: &[String], real: &str) -> String {
    let mut hops: Vec<&str> = forged.iter().map(String::as_str).collect();
    hops.push(real);
    hops.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ips_are_distinct() {
        let ips = generate_ips(600);
        let unique: std::collections::HashSet<_> = ips.iter().collect();
        assert_eq!(unique.len(), 600);
    }
}
