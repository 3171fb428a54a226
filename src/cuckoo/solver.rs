// src/cuckoo/solver.rs - Cycle search and proof recovery

//! Cycle search over the trimmed edge set.
//!
//! After trimming, surviving records are 4-byte pairs of 11-bit compressed
//! node ids. The finder treats nodes as `(X ‖ id) * 2 + side` and maintains a
//! direct-addressed predecessor array; inserting an edge walks both endpoint
//! chains, and a meeting pair of walks either closes a cycle or splices the
//! shorter chain onto the longer, which keeps walks bounded.
//!
//! A found cycle only knows its compressed endpoints. The matcher re-runs
//! edge generation over the whole edge space, filters candidates through a
//! per-(X, Y) bitset, and recovers the original edge index of every proof
//! edge by comparing both endpoints.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::matrix::read32;
use super::params::Params;
use super::siphash::{siphash24_x8, sipnode, SipKeys, SIP_LANES};
use super::trimmer::EdgeTrimmer;
use super::{Cycle, SolverError};

/// Longest predecessor chain the finder will follow
const MAX_PATH_LEN: usize = 8192;

/// Empty slot marker in the predecessor array
const NIL: u32 = u32::MAX;

/// One solve attempt: a trimmer plus the cycle-search state
pub(crate) struct SolverCtx {
    trimmer: EdgeTrimmer,
    /// Predecessor array over compressed node ids, allocated after trimming
    cuckoo: Vec<u32>,
    /// Uncompressed U nodes of the cycle being recovered
    cycle_us: Vec<u32>,
    /// Uncompressed V nodes of the cycle being recovered
    cycle_vs: Vec<u32>,
    /// Bitset of (X, Y) prefixes occupied by cycle U nodes
    uxymap: Vec<u64>,
    /// Recovered edge indices, `proof_size` per found cycle
    sols: Vec<u32>,
    proof_size: usize,
}

impl SolverCtx {
    pub fn new(header: &[u8], params: Params, threads: usize, proof_size: usize) -> Self {
        let keys = SipKeys::from_header(header);
        let uxy_words = (params.n_xy as usize + 63) / 64;
        Self {
            trimmer: EdgeTrimmer::new(keys, params, threads),
            cuckoo: Vec::new(),
            cycle_us: vec![0; proof_size],
            cycle_vs: vec![0; proof_size],
            uxymap: vec![0; uxy_words],
            sols: Vec::new(),
            proof_size,
        }
    }

    /// Trim the graph, then search it for cycles of the requested length
    pub fn solve(&mut self) -> Result<Vec<Cycle>, SolverError> {
        self.trimmer.trim()?;
        self.cuckoo = vec![NIL; self.trimmer.params.cuckoo_size];
        self.find_cycles();
        Ok(self
            .sols
            .chunks(self.proof_size)
            .map(|chunk| Cycle {
                edges: chunk.to_vec(),
            })
            .collect())
    }

    fn find_cycles(&mut self) {
        let p = self.trimmer.params.clone();
        let n_x = p.n_x as usize;
        let base = self.trimmer.buckets.mem.base();
        let mut us = vec![0u32; MAX_PATH_LEN];
        let mut vs = vec![0u32; MAX_PATH_LEN];

        for vx in 0..n_x {
            for ux in 0..n_x {
                let boff = self.trimmer.buckets.bucket_off(ux, vx);
                let bsize = self.trimmer.buckets.size(ux, vx);
                let mut rd = 0usize;
                while rd < bsize {
                    // bit        21..11     10...0
                    // read       UYYZZZ'    VYYZZ'   within VX partition
                    let e = unsafe { read32(base, boff + rd) };
                    rd += 4;
                    let uxyz = ((ux as u32) << p.yz2_bits) | (e >> p.yz2_bits);
                    let vxyz = ((vx as u32) << p.yz2_bits) | (e & p.yz2_mask);

                    let u0 = uxyz << 1;
                    let v0 = (vxyz << 1) | 1;
                    let nu = self.path(u0, &mut us);
                    let nv = self.path(v0, &mut vs);
                    if us[nu] == vs[nv] {
                        // both chains reach the same root: closing this edge
                        // forms a cycle through the first shared node
                        let common = nu.min(nv);
                        let (mut nu, mut nv) = (nu - common, nv - common);
                        while us[nu] != vs[nv] {
                            nu += 1;
                            nv += 1;
                        }
                        let len = nu + nv + 1;
                        debug!(len, "cycle found");
                        if len == self.proof_size {
                            self.record_solution(&us, nu, &vs, nv);
                        }
                    } else if nu < nv {
                        // splice the shorter chain onto the longer
                        for k in (0..nu).rev() {
                            self.cuckoo[us[k + 1] as usize] = us[k];
                        }
                        self.cuckoo[u0 as usize] = v0;
                    } else {
                        for k in (0..nv).rev() {
                            self.cuckoo[vs[k + 1] as usize] = vs[k];
                        }
                        self.cuckoo[v0 as usize] = u0;
                    }
                }
            }
        }
    }

    /// Walk the predecessor chain from `u`, recording it into `path`.
    /// Returns the index of the chain's root.
    fn path(&self, mut u: u32, path: &mut [u32]) -> usize {
        let mut nu = 0usize;
        while u != NIL {
            if nu >= MAX_PATH_LEN {
                // the tree discipline was violated; back off to the
                // repeated node instead of walking forever
                warn!("maximum path length exceeded");
                while nu > 0 {
                    nu -= 1;
                    if path[nu] == u {
                        break;
                    }
                }
                break;
            }
            path[nu] = u;
            nu += 1;
            u = self.cuckoo[u as usize];
        }
        nu.saturating_sub(1)
    }

    /// Record one found cycle: uncompress its endpoints, then recover the
    /// original edge indices and append them (sorted) to `sols`.
    fn record_solution(&mut self, us: &[u32], nu: usize, vs: &[u32], nv: usize) {
        let mut ni = 0;
        self.record_edge(ni, us[0], vs[0]);
        ni += 1;
        for k in (0..nu).rev() {
            // u's in even positions; v's in odd
            self.record_edge(ni, us[(k + 1) & !1], us[k | 1]);
            ni += 1;
        }
        for k in (0..nv).rev() {
            // u's in odd positions; v's in even
            self.record_edge(ni, vs[k | 1], vs[(k + 1) & !1]);
            ni += 1;
        }
        debug_assert_eq!(ni, self.proof_size);

        let sol_base = self.sols.len();
        self.sols.resize(sol_base + self.proof_size, 0);
        for (slot, edge) in self.match_u_nodes() {
            self.sols[sol_base + slot] = edge;
        }
        self.sols[sol_base..].sort_unstable();
    }

    /// Map one cycle edge's compressed endpoints back through both rename
    /// tables to the original node values.
    fn record_edge(&mut self, i: usize, u2: u32, v2: u32) {
        let p = &self.trimmer.params;
        let u1 = u2 / 2;
        let ux = u1 >> p.yz2_bits;
        let mut uyz = unsafe {
            self.trimmer
                .rename_u1
                .read((ux * p.n_yz2 + (u1 & p.yz2_mask)) as usize)
        };
        debug_assert!(uyz < p.n_yz1);
        let v1 = v2 / 2;
        let vx = v1 >> p.yz2_bits;
        let mut vyz = unsafe {
            self.trimmer
                .rename_v1
                .read((vx * p.n_yz2 + (v1 & p.yz2_mask)) as usize)
        };
        debug_assert!(vyz < p.n_yz1);

        if p.compress_round > 0 {
            uyz = unsafe { self.trimmer.rename_u.read((ux * p.n_yz1 + uyz) as usize) };
            vyz = unsafe { self.trimmer.rename_v.read((vx * p.n_yz1 + vyz) as usize) };
        }

        let u = ((ux << p.yz_bits) | uyz) << 1;
        let v = ((vx << p.yz_bits) | vyz) << 1 | 1;

        self.cycle_us[i] = u / 2;
        self.cycle_vs[i] = v / 2;
        let uxy = (u / 2) >> p.z_bits;
        self.uxymap[(uxy >> 6) as usize] |= 1u64 << (uxy & 63);
    }

    /// Re-run U-side edge generation across all threads and collect the
    /// (proof slot, edge index) pairs whose endpoints match the cycle.
    fn match_u_nodes(&self) -> Vec<(usize, u32)> {
        let n_threads = self.trimmer.n_threads;
        if n_threads == 1 {
            return self.match_worker(0);
        }
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..n_threads)
                .map(|id| scope.spawn(move || self.match_worker(id)))
                .collect();
            let mut matches = Vec::new();
            for handle in handles {
                matches.extend(handle.join().expect("match worker panicked"));
            }
            matches
        })
    }

    fn match_worker(&self, id: usize) -> Vec<(usize, u32)> {
        let p = &self.trimmer.params;
        let keys = &self.trimmer.keys;
        let mut matches = Vec::new();

        let starty = p.n_y as usize * id / self.trimmer.n_threads;
        let endy = p.n_y as usize * (id + 1) / self.trimmer.n_threads;
        let mut edge: u32 = (starty as u32) << p.yz_bits;

        for _my in starty..endy {
            let endedge = edge + p.n_yz;
            while edge < endedge {
                let mut nonces = [0u64; SIP_LANES];
                for (i, nonce) in nonces.iter_mut().enumerate() {
                    *nonce = 2 * u64::from(edge + i as u32);
                }
                let hashes = siphash24_x8(keys, &nonces, self.trimmer.use_simd);
                for (i, &hash) in hashes.iter().enumerate() {
                    let e = edge + i as u32;
                    let node_u = (hash & u64::from(p.edge_mask)) as u32;
                    let uxy = node_u >> p.z_bits;
                    if (self.uxymap[(uxy >> 6) as usize] >> (uxy & 63)) & 1 != 0 {
                        for slot in 0..self.proof_size {
                            if self.cycle_us[slot] == node_u
                                && self.cycle_vs[slot] == sipnode(keys, p.edge_mask, e, 1)
                            {
                                matches.push((slot, e));
                            }
                        }
                    }
                }
                edge += SIP_LANES as u32;
            }
        }
        matches
    }
}

/// Check that `edges` is a valid proof for the given header: indices sorted
/// ascending, distinct, in range, and forming a single simple cycle in the
/// bipartite siphash graph.
pub fn verify_solution(header: &[u8], edge_bits: u8, edges: &[u32]) -> Result<bool, SolverError> {
    let params = Params::new(edge_bits).ok_or(SolverError::UnsupportedEdgeBits(edge_bits))?;
    if edges.is_empty() || edges.len() % 2 != 0 {
        return Ok(false);
    }
    let keys = SipKeys::from_header(header);

    let mut endpoints = Vec::with_capacity(edges.len());
    let mut prev = None;
    for &e in edges {
        if e > params.edge_mask {
            return Ok(false);
        }
        if let Some(p) = prev {
            if e <= p {
                return Ok(false);
            }
        }
        prev = Some(e);
        // side bit keeps the two node spaces apart
        let u = u64::from(sipnode(&keys, params.edge_mask, e, 0)) * 2;
        let v = u64::from(sipnode(&keys, params.edge_mask, e, 1)) * 2 + 1;
        endpoints.push((u, v));
    }

    // every endpoint must have degree exactly two
    let mut adjacency: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, &(u, v)) in endpoints.iter().enumerate() {
        adjacency.entry(u).or_default().push(i);
        adjacency.entry(v).or_default().push(i);
    }
    if adjacency.values().any(|incident| incident.len() != 2) {
        return Ok(false);
    }

    // trace the cycle; it must close only after crossing every edge
    let start = endpoints[0].0;
    let mut at = start;
    let mut visited = vec![false; endpoints.len()];
    let mut crossed = 0;
    loop {
        let Some(&ei) = adjacency[&at].iter().find(|&&ei| !visited[ei]) else {
            break;
        };
        visited[ei] = true;
        crossed += 1;
        let (u, v) = endpoints[ei];
        at = if at == u { v } else { u };
        if at == start {
            break;
        }
    }
    Ok(crossed == endpoints.len() && at == start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_rejects_unsorted() {
        assert_eq!(verify_solution(b"h", 16, &[5, 4, 7, 8]), Ok(false));
    }

    #[test]
    fn test_verify_rejects_duplicates() {
        assert_eq!(verify_solution(b"h", 16, &[4, 4, 7, 8]), Ok(false));
    }

    #[test]
    fn test_verify_rejects_out_of_range() {
        assert_eq!(verify_solution(b"h", 16, &[1, 2, 3, 1 << 16]), Ok(false));
    }

    #[test]
    fn test_verify_rejects_odd_length() {
        assert_eq!(verify_solution(b"h", 16, &[1, 2, 3]), Ok(false));
    }

    #[test]
    fn test_verify_rejects_unsupported_edge_bits() {
        assert_eq!(
            verify_solution(b"h", 15, &[1, 2, 3, 4]),
            Err(SolverError::UnsupportedEdgeBits(15))
        );
    }

    #[test]
    fn test_verify_rejects_random_edges() {
        // arbitrary ascending indices will not form a cycle
        assert_eq!(verify_solution(b"h", 16, &[10, 20, 30, 40]), Ok(false));
    }
}
