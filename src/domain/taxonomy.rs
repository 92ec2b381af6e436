// ============================================================
// Layer 3 — Taxonomy Hierarchy
// ============================================================
// A fixed-depth rooted tree of taxonomic ranks built once from
// the training label set and then frozen.
//
// Labels look like:
//   "k__Bacteria; p__Firmicutes; c__Bacilli; o__...; f__...; g__..."
//
// A taxon at rank r is identified by its whole path from the
// root, so two genera that share a name under different
// families are two different taxa. Ids are assigned in sorted
// path order, which makes a rebuild from the same labels
// reproduce the same ids.
//
// The hierarchy serialises to a structured JSON document that
// lists each rank's vocabulary together with parent links; the
// child lists and lookup tables are rebuilt (and validated) on
// load.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::{DeepDnaError, Result};

/// Rank names used when a hierarchy is built without explicit names.
pub const DEFAULT_RANK_NAMES: [&str; 7] =
    ["kingdom", "phylum", "class", "order", "family", "genus", "species"];

/// One label in a rank's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxon {
    /// The rank-local name, e.g. `g__Bacillus`
    pub name: String,
    /// Id of the parent taxon at the previous rank (None at rank 0)
    pub parent: Option<usize>,
}

/// On-disk form of a hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HierarchyDocument {
    rank_names: Vec<String>,
    ranks: Vec<Vec<Taxon>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HierarchyDocument", into = "HierarchyDocument")]
pub struct TaxonomyHierarchy {
    rank_names: Vec<String>,
    ranks: Vec<Vec<Taxon>>,
    // children[r][id] = ids at rank r+1 whose parent is `id`
    children: Vec<Vec<Vec<usize>>>,
    // lookup[r][(parent, name)] = id
    lookup: Vec<HashMap<(Option<usize>, String), usize>>,
}

/// Split a `;`-separated taxonomy label into trimmed rank names.
pub fn split_label(label: &str) -> Vec<String> {
    label
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_rank_names(depth: usize) -> Vec<String> {
    (0..depth)
        .map(|i| {
            DEFAULT_RANK_NAMES
                .get(i)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("rank_{i}"))
        })
        .collect()
}

impl TaxonomyHierarchy {
    /// Build a hierarchy of `depth` ranks from a set of labels.
    ///
    /// Labels with more ranks than `depth` are truncated; labels
    /// with fewer are rejected.
    pub fn build<I, S>(labels: I, depth: usize) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if depth == 0 {
            return Err(DeepDnaError::invalid_config("hierarchy depth must be at least 1"));
        }

        let mut paths = BTreeSet::new();
        for label in labels {
            let label = label.as_ref();
            let mut names = split_label(label);
            if names.len() < depth {
                return Err(DeepDnaError::UnknownLabel { rank: names.len(), label: label.to_string() });
            }
            names.truncate(depth);
            paths.insert(names);
        }
        if paths.is_empty() {
            return Err(DeepDnaError::EmptyBatch("no labels to build a hierarchy from".into()));
        }

        let mut ranks: Vec<Vec<Taxon>> = vec![Vec::new(); depth];
        let mut lookup: Vec<HashMap<(Option<usize>, String), usize>> = vec![HashMap::new(); depth];
        for path in &paths {
            let mut parent = None;
            for (rank, name) in path.iter().enumerate() {
                let key = (parent, name.clone());
                let id = match lookup[rank].get(&key) {
                    Some(&id) => id,
                    None => {
                        let id = ranks[rank].len();
                        ranks[rank].push(Taxon { name: name.clone(), parent });
                        lookup[rank].insert(key, id);
                        id
                    }
                };
                parent = Some(id);
            }
        }

        let hierarchy = Self::from_document(HierarchyDocument {
            rank_names: default_rank_names(depth),
            ranks,
        })?;
        tracing::debug!(
            "Built taxonomy hierarchy: depth={}, vocab sizes={:?}",
            depth,
            hierarchy.vocab_sizes()
        );
        Ok(hierarchy)
    }

    /// Replace the rank names (e.g. with dataset-specific names).
    pub fn with_rank_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.depth() {
            return Err(DeepDnaError::DepthMismatch { expected: self.depth(), actual: names.len() });
        }
        self.rank_names = names;
        Ok(self)
    }

    fn from_document(doc: HierarchyDocument) -> Result<Self> {
        let depth = doc.ranks.len();
        if depth == 0 {
            return Err(DeepDnaError::Hierarchy("hierarchy has no ranks".into()));
        }
        if doc.rank_names.len() != depth {
            return Err(DeepDnaError::Hierarchy(format!(
                "{} rank names for {} ranks",
                doc.rank_names.len(),
                depth
            )));
        }

        let mut children: Vec<Vec<Vec<usize>>> =
            doc.ranks.iter().map(|taxa| vec![Vec::new(); taxa.len()]).collect();
        let mut lookup: Vec<HashMap<(Option<usize>, String), usize>> = Vec::with_capacity(depth);

        for (rank, taxa) in doc.ranks.iter().enumerate() {
            if taxa.is_empty() {
                return Err(DeepDnaError::Hierarchy(format!("rank {rank} has an empty vocabulary")));
            }
            let mut table = HashMap::with_capacity(taxa.len());
            for (id, taxon) in taxa.iter().enumerate() {
                match (rank, taxon.parent) {
                    (0, None) => {}
                    (0, Some(_)) => {
                        return Err(DeepDnaError::Hierarchy(format!(
                            "root-rank taxon '{}' has a parent",
                            taxon.name
                        )))
                    }
                    (_, None) => {
                        return Err(DeepDnaError::Hierarchy(format!(
                            "taxon '{}' at rank {rank} has no parent",
                            taxon.name
                        )))
                    }
                    (_, Some(p)) if p >= doc.ranks[rank - 1].len() => {
                        return Err(DeepDnaError::Hierarchy(format!(
                            "taxon '{}' at rank {rank} points at missing parent {p}",
                            taxon.name
                        )))
                    }
                    (_, Some(p)) => children[rank - 1][p].push(id),
                }
                if table.insert((taxon.parent, taxon.name.clone()), id).is_some() {
                    return Err(DeepDnaError::Hierarchy(format!(
                        "duplicate taxon '{}' at rank {rank}",
                        taxon.name
                    )));
                }
            }
            lookup.push(table);
        }

        // every non-leaf taxon needs a child for the sibling softmax
        for (rank, kids) in children.iter().enumerate().take(depth - 1) {
            if let Some(id) = kids.iter().position(Vec::is_empty) {
                return Err(DeepDnaError::Hierarchy(format!(
                    "taxon '{}' at rank {rank} has no children",
                    doc.ranks[rank][id].name
                )));
            }
        }

        Ok(Self { rank_names: doc.rank_names, ranks: doc.ranks, children, lookup })
    }

    /// Number of ranks.
    pub fn depth(&self) -> usize {
        self.ranks.len()
    }

    pub fn rank_names(&self) -> &[String] {
        &self.rank_names
    }

    /// The closed vocabulary at `rank`.
    pub fn vocabulary(&self, rank: usize) -> &[Taxon] {
        &self.ranks[rank]
    }

    /// Vocabulary size of every rank, root first.
    pub fn vocab_sizes(&self) -> Vec<usize> {
        self.ranks.iter().map(Vec::len).collect()
    }

    /// Parent id of taxon `id` at `rank` (None at the root rank).
    pub fn parent(&self, rank: usize, id: usize) -> Option<usize> {
        self.ranks.get(rank)?.get(id)?.parent
    }

    /// Parent id of every taxon at `rank`; `rank` must be at least 1.
    pub fn parents(&self, rank: usize) -> Vec<usize> {
        self.ranks[rank].iter().filter_map(|t| t.parent).collect()
    }

    /// Children (at `rank + 1`) of taxon `id` at `rank`.
    pub fn children(&self, rank: usize, id: usize) -> &[usize] {
        self.children
            .get(rank)
            .and_then(|c| c.get(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolve a full label into one id per rank.
    pub fn encode(&self, label: &str) -> Result<Vec<usize>> {
        let names = split_label(label);
        let mut ids = Vec::with_capacity(self.depth());
        let mut parent = None;
        for rank in 0..self.depth() {
            let id = names
                .get(rank)
                .and_then(|name| self.lookup[rank].get(&(parent, name.clone())))
                .copied()
                .ok_or_else(|| DeepDnaError::UnknownLabel { rank, label: label.to_string() })?;
            ids.push(id);
            parent = Some(id);
        }
        Ok(ids)
    }

    /// The label path (root to `rank`) of taxon `id`.
    pub fn decode(&self, rank: usize, id: usize) -> Option<String> {
        let mut names = Vec::with_capacity(rank + 1);
        let mut current = Some(id);
        for r in (0..=rank).rev() {
            let taxon = self.ranks.get(r)?.get(current?)?;
            names.push(taxon.name.as_str());
            current = taxon.parent;
        }
        names.reverse();
        Some(names.join("; "))
    }

    /// Ids of the longest leading path of `label` that exists in the
    /// hierarchy. Stops at the first unknown or missing rank, so a
    /// short or partly novel label yields fewer than `depth` ids.
    pub fn encode_prefix(&self, label: &str) -> Vec<usize> {
        let mut ids = Vec::with_capacity(self.depth());
        let mut parent = None;
        for (rank, name) in split_label(label).into_iter().take(self.depth()).enumerate() {
            match self.lookup[rank].get(&(parent, name)) {
                Some(&id) => {
                    ids.push(id);
                    parent = Some(id);
                }
                None => break,
            }
        }
        ids
    }

    /// Coarsen a label to its longest prefix that exists in the
    /// hierarchy. Returns an empty string when even the root rank
    /// is unknown.
    pub fn reduce_label(&self, label: &str) -> String {
        let known = self.encode_prefix(label).len();
        split_label(label).into_iter().take(known).collect::<Vec<_>>().join("; ")
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl TryFrom<HierarchyDocument> for TaxonomyHierarchy {
    type Error = DeepDnaError;

    fn try_from(doc: HierarchyDocument) -> Result<Self> {
        Self::from_document(doc)
    }
}

impl From<TaxonomyHierarchy> for HierarchyDocument {
    fn from(h: TaxonomyHierarchy) -> Self {
        HierarchyDocument { rank_names: h.rank_names, ranks: h.ranks }
    }
}
