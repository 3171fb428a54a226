// src/cuckoo/trimmer.rs - Multi-stage bucketed edge trimmer

//! The trimming pipeline.
//!
//! Worker threads move in lock-step through a fixed schedule of passes over
//! the shared bucket matrix, separated by a reusable barrier:
//!
//! 1. `gen_u_nodes` hashes every edge and buckets it by the U node's X bits.
//! 2. `gen_v_nodes` drops edges whose U node has degree one and pairs the
//!    survivors with their V nodes.
//! 3. `trim_edges` rounds alternate between the V and U orientation, each
//!    dropping edges whose trimmed endpoint has degree one.
//! 4. At `compress_round` a `trim_rename` pair replaces surviving (Y, Z)
//!    pairs with dense 15-bit ids, shrinking records to 4 bytes so later
//!    rounds (`trim_edges1`) can count degrees directly in a small table.
//! 5. A final `trim_rename1` pair compresses node ids to 11 bits for the
//!    cycle finder.
//!
//! Within a pass each worker owns a set of rows (or columns) outright, so
//! the matrix needs no locks; the barrier is the only synchronization.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::debug;

use super::barrier::Barrier;
use super::matrix::{read32, read64, write32, write64, BucketMatrix, Indexer, WordArena};
use super::params::Params;
use super::siphash::{detect_simd, siphash24_x8, sipnode, SipKeys, SIP_LANES};
use super::SolverError;

/// Shared state of one trimming run
pub(crate) struct EdgeTrimmer {
    pub params: Params,
    pub keys: SipKeys,
    pub n_threads: usize,
    /// NX x NY shared bucket matrix
    pub buckets: BucketMatrix,
    /// Per-thread staging buckets, one NY-band per worker
    tbuckets: BucketMatrix,
    /// First-rename tables: compressed id -> (Y, Z), per U row / V column
    pub rename_u: WordArena,
    /// See [`EdgeTrimmer::rename_u`]
    pub rename_v: WordArena,
    /// Second-rename tables: 11-bit id -> 15-bit id
    pub rename_u1: WordArena,
    /// See [`EdgeTrimmer::rename_u1`]
    pub rename_v1: WordArena,
    /// Surviving record count per (pass, thread), for logs and diagnostics
    counts: Vec<AtomicU64>,
    bucket_overflow: AtomicBool,
    rename_overflow: AtomicBool,
    barrier: Barrier,
    /// AVX2 siphash batches are available on this CPU
    pub use_simd: bool,
}

/// Thread-local scratch; sized once, reused across all passes
struct Scratch {
    /// Degree counters, one byte per Z (or per 15-bit id)
    degs8: Vec<u8>,
    /// Degree counters sharing slots with rename ids
    degs16: Vec<u16>,
    /// Edge indices of nodes that kept degree >= 2
    edges: Vec<u32>,
    /// Z values matching `edges`
    zs: Vec<u16>,
    /// Last edge index written per bucket, for zero-record sync
    last: Vec<u32>,
}

impl Scratch {
    fn new(p: &Params) -> Self {
        let deg_len = p.n_z.max(p.n_yz1) as usize;
        Self {
            degs8: vec![0; deg_len],
            degs16: vec![0; deg_len],
            edges: vec![0; p.z_bucket_slots],
            zs: vec![0; p.z_bucket_slots],
            last: vec![0; p.n_x as usize],
        }
    }
}

impl EdgeTrimmer {
    pub fn new(keys: SipKeys, params: Params, n_threads: usize) -> Self {
        let n_threads = n_threads.max(1);
        let n_x = params.n_x as usize;
        let n_y = params.n_y as usize;
        let buckets = BucketMatrix::new(n_x, n_y, params.z_bucket_size);
        let tbuckets = BucketMatrix::new(n_threads, n_y, params.t_bucket_size);
        let rename_u = WordArena::new(n_x * params.n_yz1 as usize);
        let rename_v = WordArena::new(n_x * params.n_yz1 as usize);
        let rename_u1 = WordArena::new(n_x * params.n_yz2 as usize);
        let rename_v1 = WordArena::new(n_x * params.n_yz2 as usize);
        let counts = (0..params.n_trims as usize * n_threads)
            .map(|_| AtomicU64::new(0))
            .collect();
        let barrier = Barrier::new(n_threads);
        Self {
            params,
            keys,
            n_threads,
            buckets,
            tbuckets,
            rename_u,
            rename_v,
            rename_u1,
            rename_v1,
            counts,
            bucket_overflow: AtomicBool::new(false),
            rename_overflow: AtomicBool::new(false),
            barrier,
            use_simd: detect_simd(),
        }
    }

    /// Run the full trimming schedule on `n_threads` workers
    pub fn trim(&self) -> Result<(), SolverError> {
        debug!(
            edge_bits = self.params.edge_bits,
            threads = self.n_threads,
            trims = self.params.n_trims,
            "trimming edges"
        );
        if self.n_threads == 1 {
            self.worker(0);
        } else {
            std::thread::scope(|s| {
                for id in 0..self.n_threads {
                    s.spawn(move || self.worker(id));
                }
            });
        }
        if self.bucket_overflow.load(Ordering::Relaxed) {
            return Err(SolverError::BucketOverflow);
        }
        if self.rename_overflow.load(Ordering::Relaxed) {
            return Err(SolverError::RenameTableOverflow);
        }
        let counts = self.round_counts();
        debug!(
            generated = counts.first().copied().unwrap_or(0),
            remaining = counts.last().copied().unwrap_or(0),
            "trimming complete"
        );
        Ok(())
    }

    /// Surviving record counts after each pass, pass 0 being edge generation
    pub fn round_counts(&self) -> Vec<u64> {
        (0..self.params.n_trims as usize)
            .map(|pass| {
                (0..self.n_threads)
                    .map(|id| self.counts[pass * self.n_threads + id].load(Ordering::Relaxed))
                    .sum()
            })
            .collect()
    }

    #[inline]
    fn record_count(&self, pass: u32, id: usize, records: u64) {
        self.counts[pass as usize * self.n_threads + id].store(records, Ordering::Relaxed);
    }

    /// One worker's walk through the whole pass schedule. Every worker calls
    /// the same sequence; the barrier keeps the passes aligned.
    fn worker(&self, id: usize) {
        let mut s = Scratch::new(&self.params);
        let p = &self.params;

        self.gen_u_nodes(id, 0, &mut s);
        self.barrier.wait();
        self.gen_v_nodes(id, 1, &mut s);
        let mut round = 2;
        while round < p.n_trims - 2 {
            self.barrier.wait();
            if round < p.compress_round {
                if round < p.expand_round {
                    self.trim_edges(id, round, p.big_size, p.big_size, true, &mut s);
                } else if round == p.expand_round {
                    self.trim_edges(id, round, p.big_size, p.bigger_size, true, &mut s);
                } else {
                    self.trim_edges(id, round, p.bigger_size, p.bigger_size, true, &mut s);
                }
            } else if round == p.compress_round {
                self.trim_rename(id, round, p.bigger_size, p.bigger_size, true, &mut s);
            } else {
                self.trim_edges1(id, round, true, &mut s);
            }
            self.barrier.wait();
            if round < p.compress_round {
                if round + 1 < p.expand_round {
                    self.trim_edges(id, round + 1, p.big_size, p.big_size, false, &mut s);
                } else if round + 1 == p.expand_round {
                    self.trim_edges(id, round + 1, p.big_size, p.bigger_size, false, &mut s);
                } else {
                    self.trim_edges(id, round + 1, p.bigger_size, p.bigger_size, false, &mut s);
                }
            } else if round == p.compress_round {
                self.trim_rename(id, round + 1, p.bigger_size, 4, false, &mut s);
            } else {
                self.trim_edges1(id, round + 1, false, &mut s);
            }
            round += 2;
        }
        self.barrier.wait();
        self.trim_rename1(id, p.n_trims - 2, true, &mut s);
        self.barrier.wait();
        self.trim_rename1(id, p.n_trims - 1, false, &mut s);
    }

    /// Hash every edge on one side and bucket the results by the node's X
    /// bits. Records carry the edge index (or its low bits) above the node's
    /// (Y, Z) pair.
    fn gen_u_nodes(&self, id: usize, uorv: u32, s: &mut Scratch) {
        let p = &self.params;
        let base = self.buckets.mem.base();
        let n_x = p.n_x as usize;
        let mut dst = Indexer::new(n_x);

        let starty = p.n_y as usize * id / self.n_threads;
        let endy = p.n_y as usize * (id + 1) / self.n_threads;
        let mut edge: u32 = (starty as u32) << p.yz_bits;

        let mut sum_size = 0usize;
        let mut overflow = false;

        for my in starty..endy {
            let endedge = edge + p.n_yz;
            dst.matrix_v(&self.buckets, my);
            if p.need_sync {
                for last in s.last.iter_mut() {
                    *last = edge;
                }
            }
            while edge < endedge {
                let mut nonces = [0u64; SIP_LANES];
                for (i, nonce) in nonces.iter_mut().enumerate() {
                    *nonce = 2 * u64::from(edge + i as u32) + u64::from(uorv);
                }
                let hashes = siphash24_x8(&self.keys, &nonces, self.use_simd);
                for (i, &hash) in hashes.iter().enumerate() {
                    let e = edge + i as u32;
                    // bit        28..21     20..13    12..0
                    // node       XXXXXX     YYYYYY    ZZZZZ
                    let node = (hash & u64::from(p.edge_mask)) as u32;
                    let ux = (node >> p.yz_bits) as usize;
                    if !p.need_sync {
                        // bit        39..21     20..13    12..0
                        // write        edge     YYYYYY    ZZZZZ
                        if p.big_size0 == 4 {
                            let zz = e.wrapping_shl(p.yz_bits) | (node & p.yz_mask);
                            unsafe { write32(base, dst.index[ux], zz) };
                        } else {
                            let zz = (u64::from(e) << p.yz_bits) | u64::from(node & p.yz_mask);
                            unsafe { write64(base, dst.index[ux], zz) };
                        }
                        dst.index[ux] += p.big_size0;
                    } else {
                        // Zero records act as sync sentinels, so a node whose
                        // packed value is zero is dropped here.
                        let zz = e.wrapping_shl(p.yz_bits) | (node & p.yz_mask);
                        if zz != 0 {
                            while s.last[ux] + p.n_non_yz <= e {
                                unsafe { write32(base, dst.index[ux], 0) };
                                dst.index[ux] += p.big_size0;
                                s.last[ux] += p.n_non_yz;
                            }
                            unsafe { write32(base, dst.index[ux], zz) };
                            dst.index[ux] += p.big_size0;
                            s.last[ux] = e;
                        }
                    }
                }
                edge += SIP_LANES as u32;
            }
            if p.need_sync {
                for ux in 0..n_x {
                    while s.last[ux] < endedge - p.n_non_yz {
                        unsafe { write32(base, dst.index[ux], 0) };
                        dst.index[ux] += p.big_size0;
                        s.last[ux] += p.n_non_yz;
                    }
                }
            }
            let (sz, of) = dst.store_v(&self.buckets, my);
            sum_size += sz;
            overflow |= of;
        }
        if overflow {
            self.bucket_overflow.store(true, Ordering::Relaxed);
        }
        self.record_count(0, id, (sum_size / p.big_size0) as u64);
    }

    /// Process the buckets of `gen_u_nodes`, discard edges whose U node has
    /// only one edge (it cannot lie on a cycle), and pair the survivors with
    /// their V nodes, bucketed by the V node's X bits.
    fn gen_v_nodes(&self, id: usize, uorv: u32, s: &mut Scratch) {
        let p = &self.params;
        let base = self.buckets.mem.base();
        let tbase = self.tbuckets.mem.base();
        let n_x = p.n_x as usize;
        let n_y = p.n_y as usize;
        let z_mask64 = u64::from(p.z_mask);
        let y_mask64 = u64::from(p.y_mask);

        let nondeg_bits = (2 * p.yz_bits).min(40) - p.z_bits;
        let nondeg_mask = (1u32 << nondeg_bits) - 1;

        let mut dst = Indexer::new(n_x);
        let mut small = Indexer::new(n_y);
        let mut sum_size = 0usize;
        let mut overflow = false;

        let startux = n_x * id / self.n_threads;
        let endux = n_x * (id + 1) / self.n_threads;

        for ux in startux..endux {
            small.matrix_u(&self.tbuckets, id);
            for my in 0..n_y {
                let mut edge: u32 = (my as u32) << p.yz_bits;
                let boff = self.buckets.bucket_off(ux, my);
                let bsize = self.buckets.size(ux, my);
                let mut rd = 0usize;
                while rd < bsize {
                    // bit     39/31..21     20..13    12..0
                    // read         edge     UYYYYY    UZZZZ   within UX partition
                    let e: u64 = if p.big_size0 > 4 {
                        (unsafe { read64(base, boff + rd) }) & p.big_slot_mask0
                    } else {
                        u64::from(unsafe { read32(base, boff + rd) })
                    };
                    rd += p.big_size0;
                    if p.need_sync && e == 0 {
                        edge = edge.wrapping_add(p.n_non_yz);
                        continue;
                    }
                    // restore the edge index generated in gen_u_nodes
                    edge = edge
                        .wrapping_add(((e >> p.yz_bits) as u32).wrapping_sub(edge) & (p.n_non_yz - 1));
                    let uy = ((e >> p.z_bits) & y_mask64) as usize;
                    // bit         39..13     12..0
                    // write         edge     UZZZZ   within UX UY partition
                    unsafe {
                        write64(
                            tbase,
                            small.index[uy],
                            (u64::from(edge) << p.z_bits) | (e & z_mask64),
                        )
                    };
                    small.index[uy] += p.small_size;
                }
            }
            let (_, of) = small.store_u(&self.tbuckets, id);
            overflow |= of;

            dst.matrix_u(&self.buckets, ux);
            for uy in 0..n_y {
                s.degs8[..p.n_z as usize].fill(0xff);
                let tboff = self.tbuckets.bucket_off(id, uy);
                let tsize = self.tbuckets.size(id, uy);
                let mut rd = 0usize;
                while rd < tsize {
                    let z = unsafe { read32(tbase, tboff + rd) } & p.z_mask;
                    s.degs8[z as usize] = s.degs8[z as usize].wrapping_add(1);
                    rd += p.small_size;
                }
                // Collect the edges whose UZ count is above one. Sole-edge
                // entries are written too but overwritten by the next
                // iteration since the cursor does not advance.
                let mut cnt = 0usize;
                let mut edge: u32 = 0;
                rd = 0;
                while rd < tsize {
                    // bit         39..13     12..0
                    // read          edge     UZZZZ    sorted by UY within UX partition
                    let e = unsafe { read64(tbase, tboff + rd) };
                    rd += p.small_size;
                    edge = edge.wrapping_add(((e >> p.z_bits) as u32).wrapping_sub(edge) & nondeg_mask);
                    let z = (e & z_mask64) as u32;
                    s.edges[cnt] = edge;
                    s.zs[cnt] = z as u16;
                    if s.degs8[z as usize] != 0 {
                        cnt += 1;
                    }
                }
                // hash the other side of each surviving edge
                let uy34 = (uy as u64) << p.yzz_bits;
                let mut i = 0usize;
                while i + SIP_LANES <= cnt {
                    let mut nonces = [0u64; SIP_LANES];
                    for (j, nonce) in nonces.iter_mut().enumerate() {
                        *nonce = 2 * u64::from(s.edges[i + j]) + u64::from(uorv);
                    }
                    let hashes = siphash24_x8(&self.keys, &nonces, self.use_simd);
                    for (j, &hash) in hashes.iter().enumerate() {
                        let node = (hash & u64::from(p.edge_mask)) as u32;
                        let vx = (node >> p.yz_bits) as usize;
                        // bit        39..34    33..21     20..13     12..0
                        // write      UYYYYY    UZZZZZ     VYYYYY     VZZZZ   within VX partition
                        unsafe {
                            write64(
                                base,
                                dst.index[vx],
                                uy34 | (u64::from(s.zs[i + j]) << p.yz_bits)
                                    | u64::from(node & p.yz_mask),
                            )
                        };
                        dst.index[vx] += p.big_size;
                    }
                    i += SIP_LANES;
                }
                while i < cnt {
                    let node = sipnode(&self.keys, p.edge_mask, s.edges[i], uorv);
                    let vx = (node >> p.yz_bits) as usize;
                    unsafe {
                        write64(
                            base,
                            dst.index[vx],
                            uy34 | (u64::from(s.zs[i]) << p.yz_bits) | u64::from(node & p.yz_mask),
                        )
                    };
                    dst.index[vx] += p.big_size;
                    i += 1;
                }
            }
            let (sz, of) = dst.store_u(&self.buckets, ux);
            sum_size += sz;
            overflow |= of;
        }
        if overflow {
            self.bucket_overflow.store(true, Ordering::Relaxed);
        }
        self.record_count(1, id, (sum_size / p.big_size) as u64);
    }

    /// Generic trimming round: bucket-sort one orientation of the matrix by
    /// the trimmed side's Y, count Z degrees per bucket, and write back only
    /// the records whose trimmed endpoint kept degree >= 2, with the record
    /// orientation flipped for the next round.
    fn trim_edges(
        &self,
        id: usize,
        round: u32,
        src_size: usize,
        dst_size: usize,
        trim_on_v: bool,
        s: &mut Scratch,
    ) {
        let p = &self.params;
        let base = self.buckets.mem.base();
        let tbase = self.tbuckets.mem.base();
        let n_x = p.n_x as usize;
        let n_y = p.n_y as usize;
        let z_mask64 = u64::from(p.z_mask);
        let y_mask64 = u64::from(p.y_mask);
        let yz_mask64 = u64::from(p.yz_mask);

        let src_slot_bits = (src_size as u32 * 8).min(2 * p.yz_bits);
        let src_slot_mask = (1u64 << src_slot_bits) - 1;
        let src_pref_mask = (1u32 << (src_slot_bits - p.yz_bits)) - 1;
        let dst_slot_bits = (dst_size as u32 * 8).min(2 * p.yz_bits);
        let dst_slot_mask = (1u64 << dst_slot_bits) - 1;
        let dst_pref_mask = (1u32 << (dst_slot_bits - p.yzz_bits)) - 1;

        let mut dst = Indexer::new(n_x);
        let mut small = Indexer::new(n_y);
        let mut sum_size = 0usize;
        let mut overflow = false;

        let startvx = n_y * id / self.n_threads;
        let endvx = n_y * (id + 1) / self.n_threads;
        for vx in startvx..endvx {
            small.matrix_u(&self.tbuckets, id);
            for ux in 0..n_x {
                let mut uxyz = (ux as u32) << p.yz_bits;
                let (bx, by) = if trim_on_v { (ux, vx) } else { (vx, ux) };
                let boff = self.buckets.bucket_off(bx, by);
                let bsize = self.buckets.size(bx, by);
                let mut rd = 0usize;
                while rd < bsize {
                    // bit        39..34    33..21     20..13     12..0
                    // read       UYYYYY    UZZZZZ     VYYYYY     VZZZZ   within VX partition
                    let e = unsafe { read64(base, boff + rd) } & src_slot_mask;
                    rd += src_size;
                    uxyz = uxyz
                        .wrapping_add(((e >> p.yz_bits) as u32).wrapping_sub(uxyz) & src_pref_mask);
                    let vy = ((e >> p.z_bits) & y_mask64) as usize;
                    // bit     41/39..34    33..26     25..13     12..0
                    // write      UXXXXX    UYYYYY     UZZZZZ     VZZZZ   within VX VY partition
                    unsafe {
                        write64(
                            tbase,
                            small.index[vy],
                            (u64::from(uxyz) << p.z_bits) | (e & z_mask64),
                        )
                    };
                    uxyz &= !p.z_mask;
                    small.index[vy] += dst_size;
                }
                debug_assert_eq!(uxyz >> p.yz_bits, ux as u32);
            }
            let (_, of) = small.store_u(&self.tbuckets, id);
            overflow |= of;

            if trim_on_v {
                dst.matrix_v(&self.buckets, vx);
            } else {
                dst.matrix_u(&self.buckets, vx);
            }
            for vy in 0..n_y {
                let vy34 = (vy as u64) << p.yzz_bits;
                s.degs8[..p.n_z as usize].fill(0xff);
                let tboff = self.tbuckets.bucket_off(id, vy);
                let tsize = self.tbuckets.size(id, vy);
                let mut rd = 0usize;
                while rd < tsize {
                    let z = unsafe { read32(tbase, tboff + rd) } & p.z_mask;
                    s.degs8[z as usize] = s.degs8[z as usize].wrapping_add(1);
                    rd += dst_size;
                }
                let mut ux: u32 = 0;
                rd = 0;
                while rd < tsize {
                    // bit     41/39..34    33..26     25..13     12..0
                    // read       UXXXXX    UYYYYY     UZZZZZ     VZZZZ   within VX VY partition
                    let e = unsafe { read64(tbase, tboff + rd) } & dst_slot_mask;
                    rd += dst_size;
                    ux = ux.wrapping_add(((e >> p.yzz_bits) as u32).wrapping_sub(ux) & dst_pref_mask);
                    // bit     41/39..34    33..21     20..13     12..0
                    // write      VYYYYY    VZZZZZ     UYYYYY     UZZZZ   within UX partition
                    unsafe {
                        write64(
                            base,
                            dst.index[ux as usize],
                            vy34 | ((e & z_mask64) << p.yz_bits) | ((e >> p.z_bits) & yz_mask64),
                        )
                    };
                    if s.degs8[(e & z_mask64) as usize] != 0 {
                        dst.index[ux as usize] += dst_size;
                    }
                }
            }
            let (sz, of) = if trim_on_v {
                dst.store_v(&self.buckets, vx)
            } else {
                dst.store_u(&self.buckets, vx)
            };
            sum_size += sz;
            overflow |= of;
        }
        if overflow {
            self.bucket_overflow.store(true, Ordering::Relaxed);
        }
        self.record_count(round, id, (sum_size / dst_size) as u64);
    }

    /// Trimming round that additionally renames surviving (Y, Z) pairs to
    /// dense ids, at most 15 bits wide, recorded per X partition. Degrees are
    /// counted in 16-bit slots so assigned ids (offset by 32) can share them.
    fn trim_rename(
        &self,
        id: usize,
        round: u32,
        src_size: usize,
        dst_size: usize,
        trim_on_v: bool,
        s: &mut Scratch,
    ) {
        let p = &self.params;
        let base = self.buckets.mem.base();
        let tbase = self.tbuckets.mem.base();
        let n_x = p.n_x as usize;
        let n_y = p.n_y as usize;
        let z_mask64 = u64::from(p.z_mask);
        let y_mask64 = u64::from(p.y_mask);
        let yz_mask64 = u64::from(p.yz_mask);

        let this_bits = if trim_on_v { p.yz_bits } else { p.yz1_bits };
        let src_slot_bits = (src_size as u32 * 8).min(this_bits + p.yz_bits);
        let src_slot_mask = (1u64 << src_slot_bits) - 1;
        let src_pref_mask = (1u32 << (src_slot_bits - p.yz_bits)) - 1;
        // ux recovery is only needed on the V pass; on the U pass the whole
        // prefix is present in the record
        let src_pref_mask2 = if src_slot_bits >= p.yzz_bits {
            (1u32 << (src_slot_bits - p.yzz_bits)) - 1
        } else {
            0
        };

        let mut dst = Indexer::new(n_x);
        let mut small = Indexer::new(n_y);
        let mut sum_size = 0usize;
        let mut overflow = false;
        let mut max_nnid = 0u32;

        let startvx = n_y * id / self.n_threads;
        let endvx = n_y * (id + 1) / self.n_threads;
        for vx in startvx..endvx {
            small.matrix_u(&self.tbuckets, id);
            for ux in 0..n_x {
                let mut uyz: u32 = 0;
                let (bx, by) = if trim_on_v { (ux, vx) } else { (vx, ux) };
                let boff = self.buckets.bucket_off(bx, by);
                let bsize = self.buckets.size(bx, by);
                let mut rd = 0usize;
                while rd < bsize {
                    // bit        39..37    36..22     21..15     14..0
                    // read       UYYYYY    UZZZZZ     VYYYYY     VZZZZ   within VX partition  if trim_on_v
                    // bit            36...22     21..15     14..0
                    // read           VYYYZZ'     UYYYYY     UZZZZ   within UX partition  if !trim_on_v
                    let e = unsafe { read64(base, boff + rd) } & src_slot_mask;
                    rd += src_size;
                    if trim_on_v {
                        uyz = uyz
                            .wrapping_add(((e >> p.yz_bits) as u32).wrapping_sub(uyz) & src_pref_mask);
                    } else {
                        uyz = (e >> p.yz_bits) as u32;
                    }
                    let vy = ((e >> p.z_bits) & y_mask64) as usize;
                    // bit        39..37    36..30     29..15     14..0
                    // write      UXXXXX    UYYYYY     UZZZZZ     VZZZZ   within VX VY partition  if trim_on_v
                    // bit            36...30     29...15     14..0
                    // write          VXXXXXX     VYYYZZ'     UZZZZ   within UX UY partition  if !trim_on_v
                    let hi = ((ux as u32) << this_bits) | uyz;
                    unsafe {
                        write64(
                            tbase,
                            small.index[vy],
                            (u64::from(hi) << p.z_bits) | (e & z_mask64),
                        )
                    };
                    if trim_on_v {
                        uyz &= !p.z_mask;
                    }
                    small.index[vy] += src_size;
                }
            }
            let (_, of) = small.store_u(&self.tbuckets, id);
            overflow |= of;

            if trim_on_v {
                dst.matrix_v(&self.buckets, vx);
            } else {
                dst.matrix_u(&self.buckets, vx);
            }
            let mut newnodeid: u32 = 0;
            let rename = if trim_on_v {
                &self.rename_v
            } else {
                &self.rename_u
            };
            let rename_base = vx * p.n_yz1 as usize;
            for vy in 0..n_y {
                s.degs16[..p.n_z as usize].fill(0xffff);
                let tboff = self.tbuckets.bucket_off(id, vy);
                let tsize = self.tbuckets.size(id, vy);
                let mut rd = 0usize;
                while rd < tsize {
                    let z = unsafe { read32(tbase, tboff + rd) } & p.z_mask;
                    s.degs16[z as usize] = s.degs16[z as usize].wrapping_add(1);
                    rd += src_size;
                }
                let mut ux: u32 = 0;
                let mut nrenames: u32 = 0;
                rd = 0;
                while rd < tsize {
                    // bit        39..37    36..30     29..15     14..0
                    // read       UXXXXX    UYYYYY     UZZZZZ     VZZZZ   within VX VY partition  if trim_on_v
                    // bit            36...30     29...15     14..0
                    // read           VXXXXXX     VYYYZZ'     UZZZZ   within UX UY partition  if !trim_on_v
                    let e = unsafe { read64(tbase, tboff + rd) } & src_slot_mask;
                    rd += src_size;
                    if trim_on_v {
                        ux = ux
                            .wrapping_add(((e >> p.yzz_bits) as u32).wrapping_sub(ux) & src_pref_mask2);
                    } else {
                        ux = (e >> p.yzz1_bits) as u32;
                    }
                    let vz = (e & z_mask64) as usize;
                    let mut vdeg = u32::from(s.degs16[vz]);
                    if vdeg != 0 {
                        if vdeg < 32 {
                            vdeg = 32 + nrenames;
                            s.degs16[vz] = vdeg as u16;
                            let node_id = newnodeid + nrenames;
                            if node_id < p.n_yz1 {
                                unsafe {
                                    rename.write(
                                        rename_base + node_id as usize,
                                        ((vy as u32) << p.z_bits) | vz as u32,
                                    )
                                };
                            }
                            nrenames += 1;
                        }
                        let node_id = newnodeid + vdeg - 32;
                        // bit       36..22     21..15     14..0
                        // write     VYYZZ'     UYYYYY     UZZZZ   within UX partition  if trim_on_v
                        if trim_on_v {
                            unsafe {
                                write64(
                                    base,
                                    dst.index[ux as usize],
                                    (u64::from(node_id) << p.yz_bits) | ((e >> p.z_bits) & yz_mask64),
                                )
                            };
                        } else {
                            unsafe {
                                write32(
                                    base,
                                    dst.index[ux as usize],
                                    (node_id << p.yz1_bits) | (((e >> p.z_bits) as u32) & p.yz1_mask),
                                )
                            };
                        }
                        dst.index[ux as usize] += dst_size;
                    }
                }
                newnodeid += nrenames;
            }
            max_nnid = max_nnid.max(newnodeid);
            let (sz, of) = if trim_on_v {
                dst.store_v(&self.buckets, vx)
            } else {
                dst.store_u(&self.buckets, vx)
            };
            sum_size += sz;
            overflow |= of;
        }
        if overflow {
            self.bucket_overflow.store(true, Ordering::Relaxed);
        }
        if max_nnid >= p.n_yz1 {
            self.rename_overflow.store(true, Ordering::Relaxed);
        }
        self.record_count(round, id, (sum_size / dst_size) as u64);
    }

    /// Post-compression trimming round over 4-byte records. Node ids fit 15
    /// bits, so degrees are counted directly per partition with no staging
    /// pass, and surviving records compact in place with their halves
    /// swapped for the next round.
    fn trim_edges1(&self, id: usize, round: u32, trim_on_v: bool, s: &mut Scratch) {
        let p = &self.params;
        let base = self.buckets.mem.base();
        let n_x = p.n_x as usize;
        let n_y = p.n_y as usize;

        let mut dst = Indexer::new(n_x);
        let mut sum_size = 0usize;
        let mut overflow = false;

        let startvx = n_y * id / self.n_threads;
        let endvx = n_y * (id + 1) / self.n_threads;
        for vx in startvx..endvx {
            if trim_on_v {
                dst.matrix_v(&self.buckets, vx);
            } else {
                dst.matrix_u(&self.buckets, vx);
            }
            s.degs8[..p.n_yz1 as usize].fill(0xff);
            for ux in 0..n_x {
                let (bx, by) = if trim_on_v { (ux, vx) } else { (vx, ux) };
                let boff = self.buckets.bucket_off(bx, by);
                let bsize = self.buckets.size(bx, by);
                let mut rd = 0usize;
                while rd < bsize {
                    let w = unsafe { read32(base, boff + rd) } & p.yz1_mask;
                    s.degs8[w as usize] = s.degs8[w as usize].wrapping_add(1);
                    rd += 4;
                }
            }
            for ux in 0..n_x {
                let (bx, by) = if trim_on_v { (ux, vx) } else { (vx, ux) };
                let boff = self.buckets.bucket_off(bx, by);
                let bsize = self.buckets.size(bx, by);
                let mut rd = 0usize;
                while rd < bsize {
                    // bit       29..22    21..15     14..7     6..0
                    // read      UYYYYY    UZZZZ'     VYYYY     VZZ'   within VX partition
                    let e = unsafe { read32(base, boff + rd) };
                    rd += 4;
                    let vyz = e & p.yz1_mask;
                    // bit       29..22    21..15     14..7     6..0
                    // write     VYYYYY    VZZZZ'     UYYYY     UZZ'   within UX partition
                    unsafe {
                        write32(base, dst.index[ux], (vyz << p.yz1_bits) | (e >> p.yz1_bits))
                    };
                    if s.degs8[vyz as usize] != 0 {
                        dst.index[ux] += 4;
                    }
                }
            }
            let (sz, of) = if trim_on_v {
                dst.store_v(&self.buckets, vx)
            } else {
                dst.store_u(&self.buckets, vx)
            };
            sum_size += sz;
            overflow |= of;
        }
        if overflow {
            self.bucket_overflow.store(true, Ordering::Relaxed);
        }
        self.record_count(round, id, (sum_size / 4) as u64);
    }

    /// Final rename pair: compress surviving 15-bit node ids to 11 bits so
    /// the cycle finder can direct-address its predecessor array.
    fn trim_rename1(&self, id: usize, round: u32, trim_on_v: bool, s: &mut Scratch) {
        let p = &self.params;
        let base = self.buckets.mem.base();
        let n_x = p.n_x as usize;
        let n_y = p.n_y as usize;

        let mut dst = Indexer::new(n_x);
        let mut sum_size = 0usize;
        let mut overflow = false;
        let mut max_nnid = 0u32;

        let startvx = n_y * id / self.n_threads;
        let endvx = n_y * (id + 1) / self.n_threads;
        for vx in startvx..endvx {
            if trim_on_v {
                dst.matrix_v(&self.buckets, vx);
            } else {
                dst.matrix_u(&self.buckets, vx);
            }
            s.degs16[..p.n_yz1 as usize].fill(0xffff);
            for ux in 0..n_x {
                let (bx, by) = if trim_on_v { (ux, vx) } else { (vx, ux) };
                let boff = self.buckets.bucket_off(bx, by);
                let bsize = self.buckets.size(bx, by);
                let mut rd = 0usize;
                while rd < bsize {
                    let w = unsafe { read32(base, boff + rd) } & p.yz1_mask;
                    s.degs16[w as usize] = s.degs16[w as usize].wrapping_add(1);
                    rd += 4;
                }
            }
            let mut newnodeid: u32 = 0;
            let rename = if trim_on_v {
                &self.rename_v1
            } else {
                &self.rename_u1
            };
            let rename_base = vx * p.n_yz2 as usize;
            for ux in 0..n_x {
                let (bx, by) = if trim_on_v { (ux, vx) } else { (vx, ux) };
                let boff = self.buckets.bucket_off(bx, by);
                let bsize = self.buckets.size(bx, by);
                let mut rd = 0usize;
                while rd < bsize {
                    // bit       29...15     14...0
                    // read      UYYYZZ'     VYYZZ'   within VX partition
                    let e = unsafe { read32(base, boff + rd) };
                    rd += 4;
                    let vyz = (e & p.yz1_mask) as usize;
                    let mut vdeg = u32::from(s.degs16[vyz]);
                    if vdeg != 0 {
                        if vdeg < 32 {
                            vdeg = 32 + newnodeid;
                            s.degs16[vyz] = vdeg as u16;
                            if newnodeid < p.n_yz2 {
                                unsafe {
                                    rename.write(rename_base + newnodeid as usize, vyz as u32)
                                };
                            }
                            newnodeid += 1;
                        }
                        // bit       25...15     14...0
                        // write     VYYZZZ"     UYYZZ'   within UX partition
                        let shift = if trim_on_v { p.yz1_bits } else { p.yz2_bits };
                        unsafe {
                            write32(base, dst.index[ux], ((vdeg - 32) << shift) | (e >> p.yz1_bits))
                        };
                        dst.index[ux] += 4;
                    }
                }
            }
            max_nnid = max_nnid.max(newnodeid);
            let (sz, of) = if trim_on_v {
                dst.store_v(&self.buckets, vx)
            } else {
                dst.store_u(&self.buckets, vx)
            };
            sum_size += sz;
            overflow |= of;
        }
        if overflow {
            self.bucket_overflow.store(true, Ordering::Relaxed);
        }
        if max_nnid >= p.n_yz2 {
            self.rename_overflow.store(true, Ordering::Relaxed);
        }
        self.record_count(round, id, (sum_size / 4) as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_trim(header: &[u8], threads: usize) -> EdgeTrimmer {
        let params = Params::new(16).unwrap();
        let keys = SipKeys::from_header(header);
        let trimmer = EdgeTrimmer::new(keys, params, threads);
        trimmer.trim().unwrap();
        trimmer
    }

    #[test]
    fn test_generation_covers_all_edges() {
        let trimmer = run_trim(b"gen count", 1);
        let counts = trimmer.round_counts();
        assert_eq!(counts[0], trimmer.params.n_edges);
    }

    #[test]
    fn test_counts_non_increasing() {
        let trimmer = run_trim(b"monotone", 2);
        let counts = trimmer.round_counts();
        for pair in counts.windows(2) {
            assert!(
                pair[1] <= pair[0],
                "trim pass grew the edge set: {} -> {}",
                pair[0],
                pair[1]
            );
        }
        // almost everything should be gone by the end
        assert!(*counts.last().unwrap() < trimmer.params.n_edges / 16);
    }

    #[test]
    fn test_thread_count_does_not_change_survivors() {
        let a = run_trim(b"threads", 1);
        let b = run_trim(b"threads", 4);
        assert_eq!(a.round_counts(), b.round_counts());
    }
}
