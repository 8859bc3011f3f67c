// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Simple-8b integer packing (`spec.md` §2 module 1).
//!
//! Simple-8b packs runs of small non-negative integers into 64-bit
//! codewords: a 4-bit selector picks how many values are packed into the
//! remaining 60 bits and how many bits each of them gets. It is used by
//! [`crate::compression`] to tighten up the TID deltas and undo-pointer
//! counters that make up most of a leaf item's fixed header before the
//! byte stream is handed to the general-purpose LZ stage.
//!
//! This is the one place in the crate where we hand-roll an algorithm
//! rather than reach for a crate, because `spec.md` §4.2 leaves "algorithm
//! choice... to the implementer" and no dependency in the corpus already
//! implements Simple-8b.

use crate::error::{Error, Result};

/// One entry of the Simple-8b selector table: how many values a codeword
/// with this selector holds, and how many bits each value occupies.
struct Selector {
    count: u32,
    bits: u32,
}

/// The 16 standard Simple-8b selectors. Selectors 0 and 1 encode runs of
/// zero values only (240 and 120 of them, respectively); all other
/// selectors pack `count` values of `bits` bits each into the low 60 bits
/// of the word.
const SELECTORS: [Selector; 16] = [
    Selector { count: 240, bits: 0 },
    Selector { count: 120, bits: 0 },
    Selector { count: 60, bits: 1 },
    Selector { count: 30, bits: 2 },
    Selector { count: 20, bits: 3 },
    Selector { count: 15, bits: 4 },
    Selector { count: 12, bits: 5 },
    Selector { count: 10, bits: 6 },
    Selector { count: 8, bits: 7 },
    Selector { count: 7, bits: 8 },
    Selector { count: 6, bits: 10 },
    Selector { count: 5, bits: 12 },
    Selector { count: 4, bits: 15 },
    Selector { count: 3, bits: 20 },
    Selector { count: 2, bits: 30 },
    Selector { count: 1, bits: 60 },
];

const SELECTOR_BITS: u32 = 4;
const PAYLOAD_BITS: u32 = 64 - SELECTOR_BITS;

fn max_value_for_bits(bits: u32) -> u64 {
    if bits == 0 {
        0
    } else if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Packs `values` into a sequence of Simple-8b codewords.
///
/// Values wider than 60 bits are truncated to their low 60 bits; callers
/// that cannot tolerate this should call [`validate_domain`] first.
#[must_use]
pub fn encode(values: &[u64]) -> Vec<u64> {
    let mut words = Vec::with_capacity(values.len() / 4 + 1);
    let mut i = 0;

    while i < values.len() {
        let remaining = &values[i..];
        let (selector_idx, selector) = best_selector(remaining);

        let mut word = (selector_idx as u64) << PAYLOAD_BITS;

        if selector.bits > 0 {
            for (slot, &value) in remaining.iter().take(selector.count as usize).enumerate() {
                word |= value << (u64::from(slot as u32) * u64::from(selector.bits));
            }
        }

        words.push(word);
        i += selector.count as usize;
    }

    words
}

/// Finds the selector packing the most values starting at `remaining`,
/// preferring selectors in table order (which is already largest-`count`
/// first for each feasible bit width).
fn best_selector(remaining: &[u64]) -> (usize, &'static Selector) {
    for (idx, selector) in SELECTORS.iter().enumerate() {
        let take = (selector.count as usize).min(remaining.len());

        if take == 0 {
            continue;
        }

        let max = max_value_for_bits(selector.bits);
        let fits = remaining[..take].iter().all(|&v| v <= max);

        // A selector is usable for a run shorter than its full count only
        // if the rest of the stream (today: nothing more, this is the
        // tail) also fits -- we simply require the values present to fit,
        // and leave the codeword's unused slots as zero, which decodes
        // back to a dropped trailing padding the caller must not read
        // past `values.len()` (tracked by the caller keeping its own
        // count, same as the Compressed item's `uncompressed_size`).
        if fits {
            return (idx, selector);
        }
    }

    // Every value fits in 60 bits by construction (see `encode`'s caller
    // contract), so selector 15 (a single 60-bit value) always matches.
    (15, &SELECTORS[15])
}

/// Decodes up to `count` values from a sequence of Simple-8b codewords.
#[must_use]
pub fn decode(words: &[u64], count: usize) -> Vec<u64> {
    let mut out = Vec::with_capacity(count);

    for &word in words {
        if out.len() >= count {
            break;
        }

        let selector_idx = (word >> PAYLOAD_BITS) as usize;
        let selector = SELECTORS.get(selector_idx).expect("valid 4-bit selector");

        if selector.bits == 0 {
            let n = (selector.count as usize).min(count - out.len());
            out.extend(std::iter::repeat(0u64).take(n));
            continue;
        }

        let mask = max_value_for_bits(selector.bits);
        let n = (selector.count as usize).min(count - out.len());

        for slot in 0..n {
            let shift = u64::from(slot as u32) * u64::from(selector.bits);
            out.push((word >> shift) & mask);
        }
    }

    out
}

/// Validates that every value in `values` fits the 60-bit-per-word domain
/// Simple-8b can represent at all (selector 15 packs one 60-bit value).
///
/// # Errors
///
/// Returns [`Error::Decode`] if any value needs more than 60 bits.
pub fn validate_domain(values: &[u64]) -> Result<()> {
    let max = max_value_for_bits(60);
    if values.iter().any(|&v| v > max) {
        return Err(Error::Decode(crate::coding::DecodeError::InvalidTag((
            "simple8b value exceeds 60 bits",
            0,
        ))));
    }
    Ok(())
}
