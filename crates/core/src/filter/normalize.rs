//! Filter normalization: reduction to canonical form, and DNF/CNF
//! conversion with a blow-up bound.
//!
//! `reduce` applies constant folding, flattening, idempotence, complement
//! elimination and absorption until a fixpoint. The reduced form is the
//! canonical form: stable for equal inputs, used as the cache key.

use crate::filter::RowFilter;

/// Upper bound on the leaf count of a normal form. Exceeding it raises
/// [`ComplexFilter`]; callers fall back to the reduced form.
const MAX_NORMAL_LEAVES: usize = 1024;

/// Marker for a normal-form blow-up past [`MAX_NORMAL_LEAVES`].
#[derive(Debug, PartialEq, Eq)]
pub struct ComplexFilter;

/// Reduces a filter to canonical form.
pub fn reduce(filter: &RowFilter) -> RowFilter {
    let mut current = reduce_once(filter);
    // Absorption can expose new folding opportunities; iterate to a
    // fixpoint. Terminates because each pass shrinks or preserves size.
    loop {
        let next = reduce_once(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn reduce_once(filter: &RowFilter) -> RowFilter {
    match filter {
        RowFilter::And(children) => reduce_group(children, true),
        RowFilter::Or(children) => reduce_group(children, false),
        leaf => leaf.clone(),
    }
}

fn reduce_group(children: &[RowFilter], is_and: bool) -> RowFilter {
    let (absorbing, identity) = if is_and {
        (RowFilter::False, RowFilter::True)
    } else {
        (RowFilter::True, RowFilter::False)
    };

    // Reduce children, flatten same-kind nesting, drop identities.
    let mut flat: Vec<RowFilter> = Vec::with_capacity(children.len());
    for child in children {
        let child = reduce_once(child);
        match (is_and, child) {
            (true, RowFilter::And(inner)) | (false, RowFilter::Or(inner)) => flat.extend(inner),
            (_, child) if child == absorbing => return absorbing,
            (_, child) if child == identity => {}
            (_, child) => flat.push(child),
        }
    }

    // Idempotence: drop duplicates, keeping first occurrence order.
    let mut unique: Vec<RowFilter> = Vec::with_capacity(flat.len());
    for child in flat {
        if !unique.contains(&child) {
            unique.push(child);
        }
    }

    // Complement elimination on leaves: `x && !x` is false, `x || !x` true.
    for child in unique.iter().filter(|c| c.is_leaf()) {
        if unique.contains(&child.not()) {
            return absorbing;
        }
    }

    // Absorption: in an And, `a && (a || b)` keeps only `a`; dually for Or.
    let absorbed: Vec<RowFilter> = unique
        .iter()
        .filter(|child| {
            let inner = match (is_and, child) {
                (true, RowFilter::Or(inner)) | (false, RowFilter::And(inner)) => inner,
                _ => return true,
            };
            !inner.iter().any(|term| {
                unique
                    .iter()
                    .any(|other| !std::ptr::eq(other, *child) && other == term)
            })
        })
        .cloned()
        .collect();

    match absorbed.len() {
        0 => identity,
        1 => absorbed.into_iter().next().expect("one child"),
        _ => {
            if is_and {
                RowFilter::And(absorbed)
            } else {
                RowFilter::Or(absorbed)
            }
        }
    }
}

fn leaf_count(filter: &RowFilter) -> usize {
    let mut count = 0;
    filter.for_each_leaf(&mut |_| count += 1);
    count
}

/// Disjunctive normal form of the reduced filter: an `Or` of `And`s of
/// leaves (degenerate shapes allowed).
pub fn dnf(filter: &RowFilter) -> Result<RowFilter, ComplexFilter> {
    let filter = reduce(filter);
    let out = reduce(&to_nf(&filter, true)?);
    Ok(out)
}

/// Conjunctive normal form, dual of [`dnf`].
pub fn cnf(filter: &RowFilter) -> Result<RowFilter, ComplexFilter> {
    let filter = reduce(filter);
    let out = reduce(&to_nf(&filter, false)?);
    Ok(out)
}

/// Normal-form conversion. `disjunctive` selects DNF; CNF is the same
/// algorithm with the roles of And/Or swapped.
fn to_nf(filter: &RowFilter, disjunctive: bool) -> Result<RowFilter, ComplexFilter> {
    match filter {
        RowFilter::And(children) if disjunctive => distribute(children, disjunctive),
        RowFilter::Or(children) if !disjunctive => distribute(children, disjunctive),
        RowFilter::And(children) | RowFilter::Or(children) => {
            // The outer connective already matches the target form.
            let is_and = matches!(filter, RowFilter::And(_));
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                out.push(to_nf(child, disjunctive)?);
            }
            Ok(if is_and {
                RowFilter::And(out)
            } else {
                RowFilter::Or(out)
            })
        }
        leaf => Ok(leaf.clone()),
    }
}

/// Distributes the inner connective over the outer: for DNF, converts
/// `And(t1..tn)` where each `ti` is in DNF into an `Or` of cross-product
/// `And` terms.
fn distribute(children: &[RowFilter], disjunctive: bool) -> Result<RowFilter, ComplexFilter> {
    // Each child becomes a list of terms of the *outer* normal form.
    let mut term_lists: Vec<Vec<RowFilter>> = Vec::with_capacity(children.len());
    for child in children {
        let child = to_nf(child, disjunctive)?;
        let terms = match (disjunctive, child) {
            (true, RowFilter::Or(terms)) | (false, RowFilter::And(terms)) => terms,
            (_, other) => vec![other],
        };
        term_lists.push(terms);
    }

    let product_size: usize = term_lists.iter().map(Vec::len).product();
    let leaves: usize = term_lists.iter().flatten().map(leaf_count).sum();
    if product_size.saturating_mul(leaves.max(1)) > MAX_NORMAL_LEAVES {
        return Err(ComplexFilter);
    }

    let mut product: Vec<Vec<RowFilter>> = vec![Vec::new()];
    for terms in &term_lists {
        let mut next = Vec::with_capacity(product.len() * terms.len());
        for partial in &product {
            for term in terms {
                let mut combined = partial.clone();
                combined.push(term.clone());
                next.push(combined);
            }
        }
        product = next;
    }

    let wrap_inner = |terms: Vec<RowFilter>| {
        if disjunctive {
            RowFilter::And(terms)
        } else {
            RowFilter::Or(terms)
        }
    };
    let inner: Vec<RowFilter> = product.into_iter().map(wrap_inner).collect();
    Ok(if disjunctive {
        RowFilter::Or(inner)
    } else {
        RowFilter::And(inner)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;
    use pretty_assertions::assert_eq;

    fn canonical(input: &str) -> String {
        reduce(&parse(input).unwrap()).to_string()
    }

    #[test]
    fn constant_folding_and_idempotence() {
        assert_eq!(canonical("a == ?0 && a == ?0"), "a == ?0");
        assert_eq!(canonical("a == ?0 || (b < ?1 && b < ?1)"), "a == ?0 || b < ?1");
    }

    #[test]
    fn complement_elimination() {
        assert_eq!(canonical("a == ?0 && a != ?0"), "false");
        assert_eq!(canonical("a <= ?0 || a > ?0"), "true");
    }

    #[test]
    fn absorption() {
        assert_eq!(canonical("a == ?0 && (a == ?0 || b < ?1)"), "a == ?0");
        assert_eq!(canonical("a == ?0 || (a == ?0 && b < ?1)"), "a == ?0");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for input in [
            "a == ?0 && (b < ?1 || c >= ?2) && d != ?3",
            "(a == ?0 || b == ?1) && (c == ?2 || d == ?3)",
            "a in ?0 || (b !in ?1 && c == ?2)",
        ] {
            let once = reduce(&parse(input).unwrap());
            let twice = reduce(&once);
            assert_eq!(once, twice, "reduce must be idempotent for {input}");
        }
    }

    #[test]
    fn dnf_distributes_and_over_or() {
        let filter = parse("(a == ?0 || b == ?1) && c == ?2").unwrap();
        assert_eq!(
            dnf(&filter).unwrap().to_string(),
            "a == ?0 && c == ?2 || b == ?1 && c == ?2"
        );
    }

    #[test]
    fn cnf_distributes_or_over_and() {
        let filter = parse("a == ?0 && b == ?1 || c == ?2").unwrap();
        assert_eq!(
            cnf(&filter).unwrap().to_string(),
            "(a == ?0 || c == ?2) && (b == ?1 || c == ?2)"
        );
    }

    #[test]
    fn dnf_blow_up_is_bounded() {
        // (a0==?0 || b0==?1) && ... 12 clauses → 4096 product terms.
        let clause: Vec<String> = (0..12)
            .map(|i| format!("(a{i} == ?0 || b{i} == ?1)"))
            .collect();
        let filter = parse(&clause.join(" && ")).unwrap();
        assert_eq!(dnf(&filter), Err(ComplexFilter));
        // The reduced form is still available as the fallback.
        assert!(leaf_count(&reduce(&filter)) == 24);
    }
}
