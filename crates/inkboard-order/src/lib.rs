//! Fractional order keys for z-ordering scene elements.
//!
//! Keys are base-62 strings split into a variable-length integer part and an
//! optional fractional part. The integer head character encodes the length of
//! the integer part (`a`..`z` for positive, `Z`..`A` for negative), which keeps
//! keys short when elements are appended or prepended repeatedly, while the
//! fractional part grows only when many keys are squeezed between the same two
//! neighbours.
//!
//! - [`key_between`] allocates a single key between two neighbours.
//! - [`n_keys_between`] allocates a run of keys in one call.
//! - [`repair`] detects duplicate, out-of-order and malformed keys in an
//!   intended order and reassigns only the minimal subset needed.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base-62 digit alphabet, in ascending byte order.
const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// The smallest integer part; nothing can be allocated before it.
const SMALLEST_INTEGER: &str = "A00000000000000000000000000";

/// Errors from key validation and allocation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderKeyError {
    #[error("malformed order key {key:?}: {reason}")]
    Malformed { key: String, reason: &'static str },

    #[error("order key space exhausted: {0}")]
    Exhausted(&'static str),
}

/// A sortable position in the scene's total order.
///
/// Construction through [`OrderKey::new`] does not validate, since keys
/// arriving from scene loads or remote peers cannot be trusted; use
/// [`OrderKey::parse`] or [`OrderKey::is_valid`] where validity matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderKey(String);

impl OrderKey {
    /// Wrap a raw key without validating it
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Wrap a raw key, rejecting malformed input
    pub fn parse(raw: impl Into<String>) -> Result<Self, OrderKeyError> {
        let raw = raw.into();
        validate(&raw)?;
        Ok(Self(raw))
    }

    /// The placeholder for elements that were never positioned
    pub fn unassigned() -> Self {
        Self(String::new())
    }

    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if the key is well formed
    pub fn is_valid(&self) -> bool {
        validate(&self.0).is_ok()
    }

    /// Get the key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digit_index(byte: u8) -> Option<usize> {
    match byte {
        b'0'..=b'9' => Some((byte - b'0') as usize),
        b'A'..=b'Z' => Some((byte - b'A') as usize + 10),
        b'a'..=b'z' => Some((byte - b'a') as usize + 36),
        _ => None,
    }
}

/// Length of the integer part announced by its head character
fn integer_length(head: u8) -> Option<usize> {
    match head {
        b'a'..=b'z' => Some((head - b'a') as usize + 2),
        b'A'..=b'Z' => Some((b'Z' - head) as usize + 2),
        _ => None,
    }
}

fn malformed(key: &[u8], reason: &'static str) -> OrderKeyError {
    OrderKeyError::Malformed {
        key: String::from_utf8_lossy(key).into_owned(),
        reason,
    }
}

fn integer_part(key: &[u8]) -> Result<&[u8], OrderKeyError> {
    let head = *key.first().ok_or_else(|| malformed(key, "empty key"))?;
    let len = integer_length(head).ok_or_else(|| malformed(key, "invalid integer head"))?;
    if len > key.len() {
        return Err(malformed(key, "integer part is truncated"));
    }
    Ok(&key[..len])
}

/// Check a raw key against the alphabet and layout rules.
pub fn validate(key: &str) -> Result<(), OrderKeyError> {
    let bytes = key.as_bytes();
    if bytes.iter().any(|&b| digit_index(b).is_none()) {
        return Err(malformed(bytes, "character outside the base-62 alphabet"));
    }
    if key == SMALLEST_INTEGER {
        return Err(malformed(bytes, "reserved smallest key"));
    }
    let integer = integer_part(bytes)?;
    let fraction = &bytes[integer.len()..];
    if fraction.last() == Some(&DIGITS[0]) {
        return Err(malformed(bytes, "trailing zero digit"));
    }
    Ok(())
}

/// Digits strictly between two fractional parts (`a < b`, `b` absent meaning one).
fn midpoint(a: &[u8], b: Option<&[u8]>) -> Result<Vec<u8>, OrderKeyError> {
    let b = b.filter(|b| !b.is_empty());
    if let Some(b) = b {
        if a >= b {
            return Err(malformed(a, "fraction bounds out of order"));
        }
    }
    if a.last() == Some(&DIGITS[0]) || b.and_then(|b| b.last()) == Some(&DIGITS[0]) {
        return Err(malformed(a, "trailing zero digit"));
    }

    if let Some(b) = b {
        // shared prefix, with `a` padded by zeros
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(DIGITS[0]) == b[n] {
            n += 1;
        }
        if n > 0 {
            let mut out = b[..n].to_vec();
            out.extend(midpoint(a.get(n..).unwrap_or(&[]), Some(&b[n..]))?);
            return Ok(out);
        }
    }

    let digit_a = match a.first() {
        Some(&d) => digit_index(d).ok_or_else(|| malformed(a, "invalid digit"))?,
        None => 0,
    };
    let digit_b = match b {
        Some(b) => digit_index(b[0]).ok_or_else(|| malformed(b, "invalid digit"))?,
        None => DIGITS.len(),
    };

    if digit_b > digit_a + 1 {
        let mid = (digit_a + digit_b + 1) / 2;
        return Ok(vec![DIGITS[mid]]);
    }
    match b {
        Some(b) if b.len() > 1 => Ok(b[..1].to_vec()),
        _ => {
            let mut out = vec![DIGITS[digit_a]];
            out.extend(midpoint(a.get(1..).unwrap_or(&[]), None)?);
            Ok(out)
        }
    }
}

fn validate_integer(int: &[u8]) -> Result<(), OrderKeyError> {
    match int.first().and_then(|&h| integer_length(h)) {
        Some(len) if len == int.len() => Ok(()),
        _ => Err(malformed(int, "integer part has the wrong length")),
    }
}

fn increment_integer(int: &[u8]) -> Result<Option<Vec<u8>>, OrderKeyError> {
    validate_integer(int)?;
    let head = int[0];
    let mut digits = int[1..].to_vec();
    let mut carry = true;
    for digit in digits.iter_mut().rev() {
        let next = digit_index(*digit).ok_or_else(|| malformed(int, "invalid digit"))? + 1;
        if next == DIGITS.len() {
            *digit = DIGITS[0];
        } else {
            *digit = DIGITS[next];
            carry = false;
            break;
        }
    }
    if !carry {
        let mut out = vec![head];
        out.extend(digits);
        return Ok(Some(out));
    }
    match head {
        b'Z' => Ok(Some(vec![b'a', DIGITS[0]])),
        b'z' => Ok(None),
        _ => {
            let next_head = head + 1;
            if next_head > b'a' {
                digits.push(DIGITS[0]);
            } else {
                digits.pop();
            }
            let mut out = vec![next_head];
            out.extend(digits);
            Ok(Some(out))
        }
    }
}

fn decrement_integer(int: &[u8]) -> Result<Option<Vec<u8>>, OrderKeyError> {
    validate_integer(int)?;
    let head = int[0];
    let last = DIGITS[DIGITS.len() - 1];
    let mut digits = int[1..].to_vec();
    let mut borrow = true;
    for digit in digits.iter_mut().rev() {
        let index = digit_index(*digit).ok_or_else(|| malformed(int, "invalid digit"))?;
        if index == 0 {
            *digit = last;
        } else {
            *digit = DIGITS[index - 1];
            borrow = false;
            break;
        }
    }
    if !borrow {
        let mut out = vec![head];
        out.extend(digits);
        return Ok(Some(out));
    }
    match head {
        b'a' => Ok(Some(vec![b'Z', last])),
        b'A' => Ok(None),
        _ => {
            let prev_head = head - 1;
            if prev_head < b'Z' {
                digits.push(last);
            } else {
                digits.pop();
            }
            let mut out = vec![prev_head];
            out.extend(digits);
            Ok(Some(out))
        }
    }
}

fn generate_between(a: Option<&[u8]>, b: Option<&[u8]>) -> Result<Vec<u8>, OrderKeyError> {
    match (a, b) {
        (None, None) => Ok(vec![b'a', DIGITS[0]]),
        (None, Some(b)) => {
            let int_b = integer_part(b)?;
            let frac_b = &b[int_b.len()..];
            if int_b == SMALLEST_INTEGER.as_bytes() {
                let mut out = int_b.to_vec();
                out.extend(midpoint(&[], Some(frac_b))?);
                return Ok(out);
            }
            if int_b < b {
                return Ok(int_b.to_vec());
            }
            decrement_integer(int_b)?.ok_or(OrderKeyError::Exhausted("cannot allocate before the smallest key"))
        }
        (Some(a), None) => {
            let int_a = integer_part(a)?;
            let frac_a = &a[int_a.len()..];
            match increment_integer(int_a)? {
                Some(next) => Ok(next),
                None => {
                    let mut out = int_a.to_vec();
                    out.extend(midpoint(frac_a, None)?);
                    Ok(out)
                }
            }
        }
        (Some(a), Some(b)) => {
            let int_a = integer_part(a)?;
            let frac_a = &a[int_a.len()..];
            let int_b = integer_part(b)?;
            let frac_b = &b[int_b.len()..];
            if int_a == int_b {
                let mut out = int_a.to_vec();
                out.extend(midpoint(frac_a, Some(frac_b))?);
                return Ok(out);
            }
            let next = increment_integer(int_a)?
                .ok_or(OrderKeyError::Exhausted("cannot allocate after the largest key"))?;
            if next.as_slice() < b {
                return Ok(next);
            }
            let mut out = int_a.to_vec();
            out.extend(midpoint(frac_a, None)?);
            Ok(out)
        }
    }
}

fn into_key(bytes: Vec<u8>) -> OrderKey {
    // every generated byte comes from DIGITS
    OrderKey(bytes.into_iter().map(char::from).collect())
}

/// Bounds with `prev >= next` are a caller error on a hot path; drop `prev`.
fn tolerant_bounds<'a>(
    prev: Option<&'a OrderKey>,
    next: Option<&'a OrderKey>,
) -> (Option<&'a OrderKey>, Option<&'a OrderKey>) {
    match (prev, next) {
        (Some(p), Some(n)) if p >= n => {
            tracing::debug!(prev = %p, next = %n, "order key bounds collide, ignoring lower bound");
            (None, next)
        }
        _ => (prev, next),
    }
}

/// Allocate a key sorting strictly between `prev` and `next`.
///
/// An absent bound means "before everything" / "after everything". If the
/// bounds are equal or inverted, `prev` is ignored and the key is allocated
/// just before `next`.
pub fn key_between(prev: Option<&OrderKey>, next: Option<&OrderKey>) -> Result<OrderKey, OrderKeyError> {
    let (prev, next) = tolerant_bounds(prev, next);
    if let Some(p) = prev {
        validate(p.as_str())?;
    }
    if let Some(n) = next {
        validate(n.as_str())?;
    }
    let bytes = generate_between(prev.map(|k| k.0.as_bytes()), next.map(|k| k.0.as_bytes()))?;
    Ok(into_key(bytes))
}

/// Allocate `n` strictly increasing keys between `prev` and `next`.
pub fn n_keys_between(
    prev: Option<&OrderKey>,
    next: Option<&OrderKey>,
    n: usize,
) -> Result<Vec<OrderKey>, OrderKeyError> {
    let (prev, next) = tolerant_bounds(prev, next);
    match n {
        0 => Ok(Vec::new()),
        1 => Ok(vec![key_between(prev, next)?]),
        _ if next.is_none() => {
            let mut keys = Vec::with_capacity(n);
            let mut current = key_between(prev, None)?;
            for _ in 1..n {
                let following = key_between(Some(&current), None)?;
                keys.push(std::mem::replace(&mut current, following));
            }
            keys.push(current);
            Ok(keys)
        }
        _ if prev.is_none() => {
            let mut keys = Vec::with_capacity(n);
            let mut current = key_between(None, next)?;
            for _ in 1..n {
                let preceding = key_between(None, Some(&current))?;
                keys.push(std::mem::replace(&mut current, preceding));
            }
            keys.push(current);
            keys.reverse();
            Ok(keys)
        }
        _ => {
            let mid = n / 2;
            let pivot = key_between(prev, next)?;
            let mut keys = n_keys_between(prev, Some(&pivot), mid)?;
            let upper = n_keys_between(Some(&pivot), next, n - mid - 1)?;
            keys.push(pivot);
            keys.extend(upper);
            Ok(keys)
        }
    }
}

/// Positions of a longest strictly increasing run of valid keys.
///
/// Equal keys keep the earlier position, so duplicates are resolved by
/// re-keying the later occurrence.
fn longest_increasing(keys: &[Option<&OrderKey>]) -> Vec<bool> {
    let mut tails: Vec<(usize, &OrderKey)> = Vec::new();
    let mut parent: Vec<Option<usize>> = vec![None; keys.len()];

    for (i, key) in keys.iter().enumerate() {
        let Some(key) = *key else { continue };
        let pos = tails.partition_point(|(_, tail)| *tail < key);
        if tails.get(pos).is_some_and(|(_, tail)| *tail == key) {
            continue;
        }
        parent[i] = pos.checked_sub(1).map(|p| tails[p].0);
        if pos == tails.len() {
            tails.push((i, key));
        } else {
            tails[pos] = (i, key);
        }
    }

    let mut keep = vec![false; keys.len()];
    let mut cursor = tails.last().map(|(i, _)| *i);
    while let Some(i) = cursor {
        keep[i] = true;
        cursor = parent[i];
    }
    keep
}

/// Restore strict ordering over a sequence given in its intended order.
///
/// Keys that are malformed, duplicated, or out of order relative to their
/// neighbours are reassigned; every key belonging to the longest valid
/// increasing run is left untouched. Returns only the reassigned entries, in
/// sequence order. Running it again over the repaired sequence returns
/// nothing.
pub fn repair<'a, I>(
    sequence: impl IntoIterator<Item = (I, &'a OrderKey)>,
) -> Result<Vec<(I, OrderKey)>, OrderKeyError> {
    let entries: Vec<(I, &OrderKey)> = sequence.into_iter().collect();
    let valid: Vec<Option<&OrderKey>> = entries
        .iter()
        .map(|(_, key)| key.is_valid().then_some(*key))
        .collect();
    let keep = longest_increasing(&valid);

    let mut assigned: Vec<Option<OrderKey>> = vec![None; entries.len()];
    let mut lower: Option<&OrderKey> = None;
    let mut i = 0;
    while i < entries.len() {
        if keep[i] {
            lower = Some(entries[i].1);
            i += 1;
            continue;
        }
        let start = i;
        while i < entries.len() && !keep[i] {
            i += 1;
        }
        let upper = entries.get(i).map(|(_, key)| *key);
        let keys = n_keys_between(lower, upper, i - start)?;
        for (slot, key) in assigned[start..i].iter_mut().zip(keys) {
            *slot = Some(key);
        }
    }

    let repaired: Vec<(I, OrderKey)> = entries
        .into_iter()
        .zip(assigned)
        .filter_map(|((id, _), key)| key.map(|key| (id, key)))
        .collect();
    if !repaired.is_empty() {
        tracing::debug!(count = repaired.len(), "reassigned order keys");
    }
    Ok(repaired)
}
