//! IUPAC nucleotide codes as 4-bit base sets.
//!
//! Each code maps to a mask over `{a, c, g, t}` (`a = 1`, `c = 2`, `g = 4`, `t = 8`).
//! Two codes are compatible when their masks intersect.

pub const A: u8 = 0b0001;
pub const C: u8 = 0b0010;
pub const G: u8 = 0b0100;
pub const T: u8 = 0b1000;
pub const ANY: u8 = 0b1111;

static MASK_LUT: [u8; 256] = {
    let mut l = [0u8; 256];
    let codes: [(u8, u8); 15] = [
        (b'a', A),
        (b'c', C),
        (b'g', G),
        (b't', T),
        (b'u', T),
        (b'r', A | G),
        (b'y', C | T),
        (b's', C | G),
        (b'w', A | T),
        (b'k', G | T),
        (b'm', A | C),
        (b'b', C | G | T),
        (b'd', A | G | T),
        (b'h', A | C | T),
        (b'v', A | C | G),
    ];
    let mut i = 0;

    while i < codes.len() {
        let (c, m) = codes[i];
        l[c as usize] = m;
        l[(c - 32) as usize] = m;
        i += 1;
    }

    l[b'n' as usize] = ANY;
    l[b'N' as usize] = ANY;
    l
};

// canonical lowercase code for each mask
static MASK_TO_CODE: [u8; 16] = [
    b'-', b'a', b'c', b'm', b'g', b'r', b's', b'v', b't', b'w', b'y', b'h', b'k', b'd', b'b', b'n',
];

static COMP_LUT: [u8; 256] = {
    let mut l = [0u8; 256];
    let mut i = 0;

    while i < l.len() {
        l[i] = i as u8;
        i += 1;
    }

    let pairs: [(u8, u8); 12] = [
        (b'a', b't'),
        (b't', b'a'),
        (b'u', b'a'),
        (b'c', b'g'),
        (b'g', b'c'),
        (b'r', b'y'),
        (b'y', b'r'),
        (b'k', b'm'),
        (b'm', b'k'),
        (b'b', b'v'),
        (b'v', b'b'),
        (b'd', b'h'),
    ];
    let mut i = 0;

    while i < pairs.len() {
        let (c, r) = pairs[i];
        l[c as usize] = r;
        l[(c - 32) as usize] = r - 32;
        i += 1;
    }

    l[b'h' as usize] = b'd';
    l[b'H' as usize] = b'D';
    l
};

/// Base set of an IUPAC code (0 for anything that is not a nucleotide code).
#[inline(always)]
pub fn mask(b: u8) -> u8 {
    MASK_LUT[b as usize]
}

/// Lowercase IUPAC code for a base set.
#[inline(always)]
pub fn code(mask: u8) -> u8 {
    MASK_TO_CODE[(mask & ANY) as usize]
}

/// Complement of a base set: `a <-> t`, `c <-> g`.
#[inline(always)]
pub fn complement_mask(m: u8) -> u8 {
    ((m & A) << 3) | ((m & C) << 1) | ((m & G) >> 1) | ((m & T) >> 3)
}

/// Complement of a single code, preserving case. Other bytes are returned unchanged.
#[inline(always)]
pub fn complement(b: u8) -> u8 {
    COMP_LUT[b as usize]
}

pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

pub fn reverse_complement_in_place(seq: &mut [u8]) {
    seq.reverse();
    seq.iter_mut().for_each(|b| *b = complement(*b));
}

pub fn is_iupac(b: u8) -> bool {
    mask(b) != 0
}

/// Two codes match when their base sets intersect.
#[inline(always)]
pub fn compatible(a: u8, b: u8) -> bool {
    mask(a) & mask(b) != 0
}

pub fn to_lower(seq: &[u8]) -> Vec<u8> {
    seq.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks() {
        assert_eq!(mask(b'A'), A);
        assert_eq!(mask(b'r'), A | G);
        assert_eq!(mask(b'N'), ANY);
        assert_eq!(mask(b'.'), 0);
        assert_eq!(code(A | G), b'r');
        assert_eq!(code(ANY), b'n');
    }

    #[test]
    fn test_complement() {
        assert_eq!(reverse_complement(b"aacgtN"), b"Nacgtt".to_vec());
        assert_eq!(reverse_complement(b"ACGR"), b"YCGT".to_vec());

        for c in b"acgtrykmbdhvswn" {
            assert_eq!(complement_mask(mask(*c)), mask(complement(*c)), "{}", *c as char);
        }
    }

    #[test]
    fn test_compatible() {
        assert!(compatible(b'a', b'r'));
        assert!(compatible(b'n', b'c'));
        assert!(!compatible(b'y', b'a'));
    }
}
