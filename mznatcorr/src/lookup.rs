/*! Cached natural abundance transition tables.

For an isotope with natural abundance `p` and a molecule with `n` atoms of its
element, [`NATables`] hold the probability that a molecule carrying `x` labeled
atoms is observed carrying `y` heavy atoms because `y - x` of the remaining
`n - x` atoms are naturally heavy:

```text
P[x, y] = C(n - x, y - x) * p^(y - x) * (1 - p)^(n - y)    for x <= y
S[y]    = P[y, y] = (1 - p)^(n - y)
```

Tables for several isotopes combine into an [`NALookup`] whose coefficients are
the products of the per-axis coefficients.
*/
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use statrs::distribution::{Binomial, Discrete};
use thiserror::Error;
use tracing::debug;

use crate::isotopes::{IsotopeLabel, UnsupportedIsotope};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupError {
    #[error(transparent)]
    UnsupportedIsotope(#[from] UnsupportedIsotope),
    #[error("Isotope {0} was not registered with this cache")]
    UnindexedIsotope(IsotopeLabel),
    #[error("Cannot build a table for {0} with maximum {1}, the maximum must be at least 1")]
    InvalidMaximum(IsotopeLabel, u32),
    #[error("Cannot build an abundance distribution for {0}: {1}")]
    InvalidDistribution(IsotopeLabel, String),
    #[error("Index {index:?} is out of range for a table of shape {shape:?}")]
    IndexOutOfRange {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
}

/// A source of natural abundance transition coefficients over an N-dimensional
/// coordinate space.
pub trait CoefficientTable {
    /// The extent of each axis, `maximum + 1`
    fn shape(&self) -> &[usize];

    /// The probability of a molecule labeled at `x` being observed at `y`
    fn product(&self, x: &[usize], y: &[usize]) -> Result<f64, LookupError>;

    /// The probability of a molecule labeled at `y` being observed at `y`
    fn sum_product(&self, y: &[usize]) -> Result<f64, LookupError>;

    fn dimensions(&self) -> usize {
        self.shape().len()
    }
}

/// A hashable key for a single table in an [`NACache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    pub isotope: IsotopeLabel,
    pub maximum: u32,
}

impl TableKey {
    pub fn new(isotope: IsotopeLabel, maximum: u32) -> Self {
        Self { isotope, maximum }
    }
}

/// The product and sum-product tables for a single isotope and atom count
#[derive(Debug, Clone, PartialEq)]
pub struct NATables {
    pub isotope: IsotopeLabel,
    pub maximum: u32,
    shape: [usize; 1],
    product: Vec<f64>,
    sum_product: Vec<f64>,
}

impl NATables {
    pub fn new(isotope: IsotopeLabel, maximum: u32) -> Result<Self, LookupError> {
        if maximum < 1 {
            return Err(LookupError::InvalidMaximum(isotope, maximum));
        }
        let n = maximum as usize;
        let size = n + 1;
        let p = isotope.natural_abundance();

        let mut product = vec![0.0; size * size];
        for x in 0..size {
            // Naturally heavy atoms among the n - x unlabeled ones
            let dist = Binomial::new(p, (n - x) as u64)
                .map_err(|e| LookupError::InvalidDistribution(isotope, e.to_string()))?;
            for y in x..size {
                product[x * size + y] = dist.pmf((y - x) as u64);
            }
        }
        let sum_product = (0..size).map(|y| product[y * size + y]).collect();

        Ok(Self {
            isotope,
            maximum,
            shape: [size],
            product,
            sum_product,
        })
    }

    pub fn key(&self) -> TableKey {
        TableKey::new(self.isotope, self.maximum)
    }

    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn product_at(&self, x: usize, y: usize) -> Option<f64> {
        let size = self.len();
        if x < size && y < size {
            Some(self.product[x * size + y])
        } else {
            None
        }
    }

    #[inline]
    pub fn sum_product_at(&self, y: usize) -> Option<f64> {
        self.sum_product.get(y).copied()
    }

    fn out_of_range(&self, index: &[usize]) -> LookupError {
        LookupError::IndexOutOfRange {
            index: index.to_vec(),
            shape: self.shape.to_vec(),
        }
    }
}

impl CoefficientTable for NATables {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn product(&self, x: &[usize], y: &[usize]) -> Result<f64, LookupError> {
        match (x, y) {
            ([i], [j]) => self.product_at(*i, *j).ok_or_else(|| self.out_of_range(y)),
            ([_], _) => Err(self.out_of_range(y)),
            _ => Err(self.out_of_range(x)),
        }
    }

    fn sum_product(&self, y: &[usize]) -> Result<f64, LookupError> {
        match y {
            [j] => self.sum_product_at(*j).ok_or_else(|| self.out_of_range(y)),
            _ => Err(self.out_of_range(y)),
        }
    }
}

/// The combination of several [`NATables`], one per axis of a peak set's coordinate space.
#[derive(Debug, Clone)]
pub struct NALookup {
    tables: Vec<Arc<NATables>>,
    shape: Vec<usize>,
}

impl NALookup {
    pub fn new(tables: Vec<Arc<NATables>>) -> Self {
        let shape = tables.iter().map(|t| t.len()).collect();
        Self { tables, shape }
    }

    pub fn tables(&self) -> &[Arc<NATables>] {
        &self.tables
    }

    fn check_rank(&self, index: &[usize]) -> Result<(), LookupError> {
        if index.len() != self.tables.len() {
            Err(LookupError::IndexOutOfRange {
                index: index.to_vec(),
                shape: self.shape.clone(),
            })
        } else {
            Ok(())
        }
    }
}

impl CoefficientTable for NALookup {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn product(&self, x: &[usize], y: &[usize]) -> Result<f64, LookupError> {
        if let [table] = self.tables.as_slice() {
            return table.product(x, y);
        }
        self.check_rank(x)?;
        self.check_rank(y)?;
        let mut acc = 1.0;
        for (table, (i, j)) in self.tables.iter().zip(x.iter().zip(y.iter())) {
            acc *= table
                .product_at(*i, *j)
                .ok_or_else(|| LookupError::IndexOutOfRange {
                    index: y.to_vec(),
                    shape: self.shape.clone(),
                })?;
            if acc == 0.0 {
                break;
            }
        }
        Ok(acc)
    }

    fn sum_product(&self, y: &[usize]) -> Result<f64, LookupError> {
        if let [table] = self.tables.as_slice() {
            return table.sum_product(y);
        }
        self.check_rank(y)?;
        let mut acc = 1.0;
        for (table, j) in self.tables.iter().zip(y.iter()) {
            acc *= table
                .sum_product_at(*j)
                .ok_or_else(|| LookupError::IndexOutOfRange {
                    index: y.to_vec(),
                    shape: self.shape.clone(),
                })?;
        }
        Ok(acc)
    }
}

/// A thread-safe, append-only store of [`NATables`] keyed by isotope and maximum.
///
/// Tables are built on first request and shared afterwards.
#[derive(Debug, Default)]
pub struct NACache {
    isotopes: Vec<IsotopeLabel>,
    tables: RwLock<HashMap<TableKey, Arc<NATables>>>,
}

impl NACache {
    pub fn new(isotopes: &[IsotopeLabel]) -> Self {
        Self {
            isotopes: isotopes.to_vec(),
            tables: RwLock::default(),
        }
    }

    pub fn from_symbols<S: AsRef<str>>(symbols: &[S]) -> Result<Self, LookupError> {
        let isotopes = symbols
            .iter()
            .map(|s| s.as_ref().parse::<IsotopeLabel>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(&isotopes))
    }

    pub fn isotopes(&self) -> &[IsotopeLabel] {
        &self.isotopes
    }

    /// Get the tables for `isotope` and `maximum`, building them if this is the first request.
    pub fn build_table(
        &self,
        isotope: IsotopeLabel,
        maximum: u32,
    ) -> Result<Arc<NATables>, LookupError> {
        if !self.isotopes.contains(&isotope) {
            return Err(LookupError::UnindexedIsotope(isotope));
        }
        if maximum < 1 {
            return Err(LookupError::InvalidMaximum(isotope, maximum));
        }
        let key = TableKey::new(isotope, maximum);
        if let Some(table) = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(table.clone());
        }

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        match tables.entry(key) {
            Entry::Occupied(ent) => Ok(ent.get().clone()),
            Entry::Vacant(ent) => {
                debug!("Building NA tables for {isotope} with maximum {maximum}");
                let table = Arc::new(NATables::new(isotope, maximum)?);
                ent.insert(table.clone());
                Ok(table)
            }
        }
    }

    /// Combine the tables for each `(isotope, maximum)` axis into a single lookup, in the order given
    pub fn lookup_for(&self, axes: &[(IsotopeLabel, u32)]) -> Result<NALookup, LookupError> {
        let tables = axes
            .iter()
            .map(|(isotope, maximum)| self.build_table(*isotope, *maximum))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(NALookup::new(tables))
    }

    pub fn get(&self, key: &TableKey) -> Option<Arc<NATables>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of the cached tables, ordered by key
    pub fn iter(&self) -> std::vec::IntoIter<(TableKey, Arc<NATables>)> {
        let mut entries: Vec<_> = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        entries.sort_by_key(|(k, _)| *k);
        entries.into_iter()
    }

    pub fn clear(&mut self) {
        self.tables
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn binomial(n: u64, k: u64) -> f64 {
        (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
    }

    #[test]
    fn test_table_coefficients() {
        let table = NATables::new(IsotopeLabel::C13, 4).unwrap();
        let p = IsotopeLabel::C13.natural_abundance();
        let q = 1.0 - p;
        assert_eq!(table.len(), 5);
        for x in 0..5u64 {
            for y in 0..5u64 {
                let found = table.product_at(x as usize, y as usize).unwrap();
                if y < x {
                    assert_eq!(found, 0.0);
                } else {
                    let n = 4;
                    let expected = binomial(n - x, y - x)
                        * p.powi((y - x) as i32)
                        * q.powi((n - y) as i32);
                    assert!((found - expected).abs() < 1e-12, "{x} {y} {found} {expected}");
                }
            }
            // Each row is a distribution over the remaining atoms
            let row_sum: f64 = (0..5).map(|y| table.product_at(x as usize, y).unwrap()).sum();
            assert!((row_sum - 1.0).abs() < 1e-12);
        }
        assert!((table.sum_product_at(0).unwrap() - q.powi(4)).abs() < 1e-12);
        assert!((table.sum_product_at(4).unwrap() - 1.0).abs() < 1e-12);
        assert!(table.product_at(5, 0).is_none());
    }

    #[test]
    fn test_invalid_maximum() {
        assert_eq!(
            NATables::new(IsotopeLabel::N15, 0),
            Err(LookupError::InvalidMaximum(IsotopeLabel::N15, 0))
        );
    }

    #[test]
    fn test_build_table_idempotent() {
        let cache = NACache::new(&[IsotopeLabel::C13, IsotopeLabel::N15]);
        assert!(cache.is_empty());
        let a = cache.build_table(IsotopeLabel::C13, 6).unwrap();
        let b = cache.build_table(IsotopeLabel::C13, 6).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, *b);
        assert_eq!(cache.len(), 1);

        cache.build_table(IsotopeLabel::N15, 2).unwrap();
        let keys: Vec<_> = cache.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                TableKey::new(IsotopeLabel::C13, 6),
                TableKey::new(IsotopeLabel::N15, 2)
            ]
        );
    }

    #[test]
    fn test_cache_errors() {
        let cache = NACache::from_symbols(&["13C"]).unwrap();
        assert_eq!(
            cache.build_table(IsotopeLabel::H2, 3).unwrap_err(),
            LookupError::UnindexedIsotope(IsotopeLabel::H2)
        );
        assert_eq!(
            cache.build_table(IsotopeLabel::C13, 0).unwrap_err(),
            LookupError::InvalidMaximum(IsotopeLabel::C13, 0)
        );
        assert!(matches!(
            NACache::from_symbols(&["13C", "18O"]),
            Err(LookupError::UnsupportedIsotope(_))
        ));
    }

    #[test]
    fn test_combined_lookup() {
        let cache = NACache::new(&[IsotopeLabel::C13, IsotopeLabel::N15]);
        let lookup = cache
            .lookup_for(&[(IsotopeLabel::C13, 3), (IsotopeLabel::N15, 2)])
            .unwrap();
        assert_eq!(lookup.shape(), &[4, 3]);
        assert_eq!(lookup.dimensions(), 2);

        let c = cache.build_table(IsotopeLabel::C13, 3).unwrap();
        let n = cache.build_table(IsotopeLabel::N15, 2).unwrap();
        let expected = c.product_at(1, 2).unwrap() * n.product_at(0, 1).unwrap();
        let found = lookup.product(&[1, 0], &[2, 1]).unwrap();
        assert!((found - expected).abs() < 1e-15);

        let expected = c.sum_product_at(1).unwrap() * n.sum_product_at(2).unwrap();
        assert!((lookup.sum_product(&[1, 2]).unwrap() - expected).abs() < 1e-15);

        assert_eq!(lookup.product(&[2, 0], &[1, 1]).unwrap(), 0.0);
        assert!(lookup.product(&[0, 0], &[4, 0]).is_err());
        assert!(lookup.sum_product(&[0]).is_err());

        let single = cache.lookup_for(&[(IsotopeLabel::C13, 3)]).unwrap();
        assert_eq!(
            single.product(&[0], &[1]).unwrap(),
            c.product_at(0, 1).unwrap()
        );
    }
}
