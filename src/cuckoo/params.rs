// src/cuckoo/params.rs - Derived bit-partition parameters

//! Bit partition and derived sizes for the bucketed trimmer.
//!
//! Node bits are logically split into three groups: `x_bits` 'X' bits (most
//! significant), `y_bits` 'Y' bits, and `z_bits` 'Z' bits (least
//! significant). With the production defaults `x_bits = y_bits = 7` and
//! `z_bits = 15` these sum to `edge_bits = 29`:
//!
//! ```text
//! nodebits   XXXXXXX YYYYYYY ZZZZZZZZZZZZZZZ
//! bit%10     8765432 1098765 432109876543210
//! ```
//!
//! The solver stores all edges in a matrix of `n_x * n_x` buckets, where
//! `n_x = 2^x_bits`. Edge i between nodes `ui = siphash24(2i)` and
//! `vi = siphash24(2i+1)` resides in the bucket at `(uiX, viX)`. In each
//! trimming round either a matrix row or column is bucket sorted on uY or vY,
//! Z values are counted within each bucket, and edges whose count is one are
//! eliminated. Once enough edges are gone, a pair of compression rounds
//! remaps surviving (Y,Z) pairs into dense 15-bit ids, and a final pair
//! remaps those into 11 bits.

/// Minimum supported graph size exponent
pub const MIN_EDGE_BITS: u8 = 16;
/// Maximum supported graph size exponent
pub const MAX_EDGE_BITS: u8 = 31;

// For p close to 0, Pr(X>=k) < e^{-n*p*eps^2} where k = n*p*(1+eps); see the
// binomial tail bounds. eps of 5/64 keeps the odds of overflowing a Z bucket
// negligible at production sizes.
const BIG_EPS_NUM: usize = 5;
const BIG_EPS_DEN: usize = 64;

// 184/256 is safely over the 1-1/e ~ 0.63 first-round trimming fraction.
const TRIM_FRAC_NUM: usize = 184;
const TRIM_FRAC_DEN: usize = 256;

/// X bits for a given graph size, growing with roughly (edge_bits-1)/4
pub fn x_bits_for(edge_bits: u8) -> Option<u8> {
    match edge_bits {
        16 => Some(0),
        17 | 18 => Some(1),
        19 | 20 => Some(2),
        21 | 22 => Some(3),
        23 | 24 => Some(4),
        25 | 26 => Some(5),
        27 | 28 => Some(6),
        29 => Some(7),
        30 | 31 => Some(8),
        _ => None,
    }
}

/// All derived constants for one (edge_bits, x_bits) instantiation.
///
/// The record-width fields deserve a note: `big_size0` is the width of the
/// initial edge records (4 bytes below 30 edge bits, 5 above), `big_size` /
/// `small_size` the width of paired-endpoint records, and `bigger_size` the
/// expanded width used by large graphs once enough edges have been trimmed
/// that edge indices no longer fit the shared prefix.
#[derive(Debug, Clone)]
pub struct Params {
    /// Graph size exponent
    pub edge_bits: u32,
    /// Number of edges / size of each node space
    pub n_edges: u64,
    /// Mask selecting a node from a siphash output
    pub edge_mask: u32,

    /// High bits of a node used as the bucket row/column index
    pub x_bits: u32,
    /// Number of X values (matrix dimension)
    pub n_x: u32,
    /// Mask for the X field
    pub x_mask: u32,

    /// Mid bits of a node, always equal to `x_bits`
    pub y_bits: u32,
    /// Number of Y values
    pub n_y: u32,
    /// Mask for the Y field
    pub y_mask: u32,

    /// Number of (X, Y) combinations
    pub n_xy: u32,

    /// Low bits of a node carried as in-bucket payload
    pub z_bits: u32,
    /// Number of Z values
    pub n_z: u32,
    /// Mask for the Z field
    pub z_mask: u32,

    /// Bits of a node below the X field
    pub yz_bits: u32,
    /// Number of (Y, Z) combinations
    pub n_yz: u32,
    /// Mask for the (Y, Z) field
    pub yz_mask: u32,

    /// Width of first-rename compressed node ids (at most 15)
    pub yz1_bits: u32,
    /// Number of first-rename ids per X partition
    pub n_yz1: u32,
    /// Mask for first-rename ids
    pub yz1_mask: u32,

    /// Z part of a first-rename id
    pub z1_bits: u32,
    /// Number of first-rename ids per bucket
    pub n_z1: u32,
    /// Mask for the Z part of a first-rename id
    pub z1_mask: u32,

    /// Width of second-rename compressed node ids (at most 11)
    pub yz2_bits: u32,
    /// Number of second-rename ids per X partition
    pub n_yz2: u32,
    /// Mask for second-rename ids
    pub yz2_mask: u32,

    /// Z part of a second-rename id
    pub z2_bits: u32,
    /// Number of second-rename ids per bucket
    pub n_z2: u32,
    /// Mask for the Z part of a second-rename id
    pub z2_mask: u32,

    /// Shift placing a Y value above a (Y, Z) ‖ Z record
    pub yzz_bits: u32,
    /// Shift placing a value above a (YZ1, Z) record
    pub yzz1_bits: u32,

    /// Round at which (Y, Z) pairs are renamed to 15-bit ids
    pub compress_round: u32,
    /// Round at which record width expands from `big_size` to `bigger_size`
    pub expand_round: u32,

    /// Paired-endpoint record width in bytes
    pub big_size: usize,
    /// Initial edge record width in bytes
    pub big_size0: usize,
    /// Per-thread staging record width in bytes
    pub small_size: usize,
    /// Expanded record width for large graphs
    pub bigger_size: usize,

    /// Mask selecting the valid bits of an initial edge record
    pub big_slot_mask0: u64,

    /// Bits of an edge index stored above the (Y, Z) field in initial records
    pub non_yz_bits: u32,
    /// Edge-index stride recoverable from stored prefix bits
    pub n_non_yz: u32,

    /// Expected surviving Z entries per bucket after the first trim
    pub n_trimmed_z: usize,
    /// Record slots per bucket including the overflow margin
    pub z_bucket_slots: usize,
    /// Bucket capacity in bytes for the shared matrix
    pub z_bucket_size: usize,
    /// Bucket capacity in bytes for per-thread staging buckets
    pub t_bucket_size: usize,

    /// Whether initial records need zero-record synchronization: 4-byte
    /// records above 27 edge bits cannot hold enough edge-index bits, so
    /// writers emit zero sentinels to recover them (and drop nodes hashing
    /// to zero, which collide with the sentinel)
    pub need_sync: bool,

    /// Entries in the cycle finder's predecessor array
    pub cuckoo_size: usize,

    /// Number of trimming rounds
    pub n_trims: u32,
}

impl Params {
    /// Derive every constant for the given graph size exponent.
    ///
    /// Returns `None` when `edge_bits` is outside the supported range.
    pub fn new(edge_bits: u8) -> Option<Self> {
        let x_bits = u32::from(x_bits_for(edge_bits)?);
        let edge_bits = u32::from(edge_bits);

        let n_edges = 1u64 << edge_bits;
        let edge_mask = (n_edges - 1) as u32;

        let y_bits = x_bits;
        let n_x = 1u32 << x_bits;
        let x_mask = n_x - 1;
        let n_y = 1u32 << y_bits;
        let y_mask = n_y - 1;

        let xy_bits = x_bits + y_bits;
        let n_xy = 1u32 << xy_bits;

        let z_bits = edge_bits - xy_bits;
        let n_z = 1u32 << z_bits;
        let z_mask = n_z - 1;

        let yz_bits = edge_bits - x_bits;
        let n_yz = 1u32 << yz_bits;
        let yz_mask = n_yz - 1;

        let yz1_bits = yz_bits.min(15);
        let n_yz1 = 1u32 << yz1_bits;
        let yz1_mask = n_yz1 - 1;

        let z1_bits = yz1_bits - y_bits;
        let n_z1 = 1u32 << z1_bits;
        let z1_mask = n_z1 - 1;

        let yz2_bits = yz_bits.min(11);
        let n_yz2 = 1u32 << yz2_bits;
        let yz2_mask = n_yz2 - 1;

        let z2_bits = yz2_bits - y_bits;
        let n_z2 = 1u32 << z2_bits;
        let z2_mask = n_z2 - 1;

        let yzz_bits = yz_bits + z_bits;
        let yzz1_bits = yz1_bits + z_bits;

        let compress_round = if edge_bits < 30 { 14 } else { 22 };
        let expand_round = if edge_bits < 30 { compress_round } else { 8 };

        let big_size = 5usize;
        let big_size0 = if edge_bits < 30 { 4 } else { big_size };
        let small_size = big_size;
        let bigger_size = if edge_bits < 30 { big_size } else { big_size + 1 };

        let big_slot_bits0 = (big_size0 * 8) as u32;
        let big_slot_mask0 = (1u64 << big_slot_bits0) - 1;

        let non_yz_bits = big_slot_bits0 - yz_bits;
        let n_non_yz = 1u32 << non_yz_bits;

        let n_trimmed_z = n_z as usize * TRIM_FRAC_NUM / TRIM_FRAC_DEN;
        let z_bucket_slots = n_z as usize + n_z as usize * BIG_EPS_NUM / BIG_EPS_DEN;
        let z_bucket_size = z_bucket_slots * big_size0;
        let t_bucket_size = z_bucket_slots * big_size;

        let need_sync = big_size0 == 4 && edge_bits > 27;

        let cuckoo_size = 2 * n_x as usize * n_yz2 as usize;

        let n_trims = if edge_bits >= 30 { 96 } else { 68 };

        Some(Params {
            edge_bits,
            n_edges,
            edge_mask,
            x_bits,
            n_x,
            x_mask,
            y_bits,
            n_y,
            y_mask,
            n_xy,
            z_bits,
            n_z,
            z_mask,
            yz_bits,
            n_yz,
            yz_mask,
            yz1_bits,
            n_yz1,
            yz1_mask,
            z1_bits,
            n_z1,
            z1_mask,
            yz2_bits,
            n_yz2,
            yz2_mask,
            z2_bits,
            n_z2,
            z2_mask,
            yzz_bits,
            yzz1_bits,
            compress_round,
            expand_round,
            big_size,
            big_size0,
            small_size,
            bigger_size,
            big_slot_mask0,
            non_yz_bits,
            n_non_yz,
            n_trimmed_z,
            z_bucket_slots,
            z_bucket_size,
            t_bucket_size,
            need_sync,
            cuckoo_size,
            n_trims,
        })
    }

    /// Bytes of the shared bucket matrix
    pub fn shared_bytes(&self) -> u64 {
        self.n_x as u64 * self.n_y as u64 * self.z_bucket_size as u64
    }

    /// Bytes of per-thread staging buckets and scratch arrays
    pub fn thread_bytes(&self) -> u64 {
        let degs = 2 * self.n_z.max(self.n_yz1) as u64; // shared by u8 and u16 views
        let staging = self.n_y as u64 * self.t_bucket_size as u64;
        let scratch = self.z_bucket_slots as u64 * (4 + 2); // edge and z lists
        staging + degs + scratch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_params() {
        let p = Params::new(29).unwrap();
        assert_eq!(p.x_bits, 7);
        assert_eq!(p.n_x, 128);
        assert_eq!(p.z_bits, 15);
        assert_eq!(p.n_z, 32768);
        assert_eq!(p.yz_bits, 22);
        assert_eq!(p.yz1_bits, 15);
        assert_eq!(p.yz2_bits, 11);
        assert_eq!(p.big_size0, 4);
        assert!(p.need_sync);
        assert_eq!(p.compress_round, 14);
        assert_eq!(p.n_trims, 68);
        assert_eq!(p.z_bucket_slots, 32768 + 2560);
    }

    #[test]
    fn test_smallest_graph_params() {
        let p = Params::new(16).unwrap();
        assert_eq!(p.x_bits, 0);
        assert_eq!(p.n_x, 1);
        assert_eq!(p.z_bits, 16);
        assert_eq!(p.yz_bits, 16);
        assert_eq!(p.yz1_bits, 15);
        assert_eq!(p.yz2_bits, 11);
        assert!(!p.need_sync);
        assert_eq!(p.cuckoo_size, 2 * 2048);
    }

    #[test]
    fn test_large_graph_widths() {
        let p = Params::new(30).unwrap();
        assert_eq!(p.big_size0, 5);
        assert_eq!(p.bigger_size, 6);
        assert_eq!(p.expand_round, 8);
        assert_eq!(p.compress_round, 22);
        assert_eq!(p.n_trims, 96);
        assert!(!p.need_sync);
    }

    #[test]
    fn test_edge_bits_coverage() {
        for eb in MIN_EDGE_BITS..=MAX_EDGE_BITS {
            let p = Params::new(eb).unwrap();
            assert_eq!(p.x_bits + p.y_bits + p.z_bits, p.edge_bits);
            // compressed ids must not widen
            assert!(p.yz1_bits <= p.yz_bits);
            assert!(p.yz2_bits <= p.yz1_bits);
        }
        assert!(Params::new(15).is_none());
        assert!(Params::new(32).is_none());
    }

    #[test]
    fn test_memory_estimates_monotone() {
        let small = Params::new(16).unwrap();
        let large = Params::new(29).unwrap();
        assert!(large.shared_bytes() > small.shared_bytes());
        assert!(large.thread_bytes() > small.thread_bytes());
    }
}
