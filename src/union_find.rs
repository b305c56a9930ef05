//! Union-Find (Disjoint Set Union) over dense indices.
//!
//! The clusterer links vectors by position in the input slice, so the
//! forest is two flat `Vec`s instead of hash maps. Path compression and
//! union by rank keep operations near-constant time.

/// Union-Find over the indices `0..len`.
///
/// # Example
/// ```
/// use route_stats::union_find::UnionFind;
///
/// let mut uf = UnionFind::new(3);
/// uf.union(0, 1);
/// assert_eq!(uf.find(0), uf.find(1));
/// assert_ne!(uf.find(0), uf.find(2));
/// ```
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    /// Create `len` singleton sets.
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    /// Find the root of the set containing `item`, compressing the path.
    pub fn find(&mut self, item: usize) -> usize {
        let mut root = item;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        let mut current = item;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }

        root
    }

    /// Union the sets containing `a` and `b`.
    ///
    /// Returns true if the sets were different (union performed),
    /// false if they were already in the same set.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);

        if root_a == root_b {
            return false;
        }

        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }

        true
    }

    /// Dense component ids for the given members, numbered `0..k` in order of
    /// each component's first appearance in `members`.
    ///
    /// Returns a vector indexed like the forest; entries for indices not in
    /// `members` are `None`.
    pub fn component_ids<I>(&mut self, members: I) -> Vec<Option<u32>>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut ids = vec![None; self.parent.len()];
        let mut root_ids: Vec<Option<u32>> = vec![None; self.parent.len()];
        let mut next = 0u32;

        for item in members {
            let root = self.find(item);
            let id = *root_ids[root].get_or_insert_with(|| {
                let id = next;
                next += 1;
                id
            });
            ids[item] = Some(id);
        }

        ids
    }
}
