//! Argument-splitting combinators: turning whole input collections into
//! [`crate::partition::PartitionGenerator`]s the engine can drive.
//!
//! Mirrors the Python `all_arguments`/`per_argument` decorators, which
//! choose whether a single partitioning function consumes every
//! positional argument together or each argument is partitioned
//! independently. Since this crate's arguments are statically typed
//! rather than a variadic `*args`, the same distinction shows up as two
//! families of constructor functions rather than two decorators: a
//! single-argument case ([`by_chunk`]) and a lockstep multi-argument case
//! ([`zipped`]), both producing concrete [`PartitionGenerator`]
//! implementations from [`crate::partition::slice`].

use crate::error::SplitError;
use crate::partition::slice::{SlicePartitioner, ZippedSlicePartitioner};
use crate::partition::PartitionGenerator;

/// Partitions a single owned `Vec<T>` by contiguous chunk.
///
/// Corresponds to `all_arguments(by_chunk)` for a one-argument function:
/// there is only one argument, so "all arguments" and "per argument"
/// coincide.
pub fn by_chunk<T>(items: Vec<T>) -> SlicePartitioner<T> {
    SlicePartitioner::new(items)
}

/// The *all-arguments* shape: the caller's own [`PartitionGenerator`]
/// already knows how to partition the full, composite payload, so this is
/// the identity function. It exists so call sites can write
/// `all_arguments(my_generator)` and read the same intent the Python
/// decorator of the same name expresses, rather than passing a generator
/// to [`crate::engine::ParallelFunction::call`] bare.
pub fn all_arguments<G>(generator: G) -> G {
    generator
}

/// The *per-argument*, single-partitioned-argument shape: wraps one
/// named argument's generator so a caller assembling a
/// [`crate::split::zipped`] pair (or a larger lockstep tuple of its own)
/// can name each argument consistently with [`SplitError::PartitionMismatch`]
/// diagnostics.
pub fn per_argument_of<T>(_name: &str, items: Vec<T>) -> SlicePartitioner<T> {
    SlicePartitioner::new(items)
}

/// Partitions two owned `Vec`s in lockstep, validating up front that they
/// carry the same number of items.
///
/// Corresponds to `per_argument(by_chunk)` applied independently to two
/// sequence-shaped arguments whose partitions are recombined one-to-one.
/// Returns [`SplitError::PartitionMismatch`] if the two inputs have
/// different lengths, since a lockstep split cannot align them otherwise.
pub fn zipped<A, B>(
    arg_a_name: &str,
    a: Vec<A>,
    arg_b_name: &str,
    b: Vec<B>,
) -> Result<ZippedSlicePartitioner<A, B>, SplitError> {
    if a.len() != b.len() {
        return Err(SplitError::PartitionMismatch {
            arg_a: arg_a_name.to_string(),
            len_a: a.len(),
            arg_b: arg_b_name.to_string(),
            len_b: b.len(),
        });
    }
    Ok(ZippedSlicePartitioner::new(a, b))
}

/// Validates that every named argument reports the same length, returning
/// [`SplitError::PartitionMismatch`] against the first argument that
/// disagrees with the first entry in `pairs`.
///
/// Used by [`per_argument!`] to check all of its arguments up front, the
/// same way [`zipped`] checks its two.
pub fn validate_lockstep_lens(pairs: &[(&str, usize)]) -> Result<(), SplitError> {
    if let Some((first_name, first_len)) = pairs.first() {
        for (name, len) in &pairs[1..] {
            if len != first_len {
                return Err(SplitError::PartitionMismatch {
                    arg_a: first_name.to_string(),
                    len_a: *first_len,
                    arg_b: name.to_string(),
                    len_b: *len,
                });
            }
        }
    }
    Ok(())
}

/// Partitions an arbitrary number of named argument vectors in lockstep,
/// generalizing [`zipped`] (the two-argument case) and [`per_argument_of`]
/// (the one-argument case) the same way `per_argument(by_chunk)` applies to
/// any number of positional sequence arguments in the decorator this crate
/// mirrors.
///
/// All arguments are validated up front to share one length before any
/// chunk is requested. The resulting generator yields right-nested
/// tuples: `per_argument!("a" => a, "b" => b)` yields `(Vec<A>, Vec<B>)`
/// (the same shape [`zipped`] produces), `per_argument!("a" => a, "b" =>
/// b, "c" => c)` yields `(Vec<A>, (Vec<B>, Vec<C>))`, and so on — match
/// the nested tuple in the function passed to
/// [`crate::engine::ParallelFunction`] to destructure it, e.g. `|(a, (b,
/// c))| ...`.
///
/// Each `$items` expression is evaluated twice (once borrowed, for the
/// length check, once moved, to build the partitioner), so pass a
/// variable rather than an expression with side effects.
#[macro_export]
macro_rules! per_argument {
    ($name:expr => $items:expr $(,)?) => {
        Ok::<_, $crate::error::SplitError>($crate::split::per_argument_of($name, $items))
    };
    ($name1:expr => $items1:expr, $($name:expr => $items:expr),+ $(,)?) => {{
        $crate::split::validate_lockstep_lens(&[
            ($name1, $items1.len()),
            $(($name, $items.len())),+
        ])
        .and_then(|_| {
            $crate::per_argument!($($name => $items),+).map(|rest| {
                $crate::partition::Zip::new(
                    $crate::partition::slice::SlicePartitioner::new($items1),
                    rest,
                )
            })
        })
    }};
}

/// Validates that a generator never yields an empty, non-terminal chunk.
///
/// Used by the engine as a sanity check on custom
/// [`PartitionGenerator`] implementations: a generator that returns
/// `Some(chunk)` with a zero-length chunk before exhaustion is malformed
/// (it would cause the engine to submit no-op work forever).
pub fn validate_chunk_len(arg_name: &str, len: usize) -> Result<(), SplitError> {
    if len == 0 {
        return Err(SplitError::EmptyChunk {
            arg: arg_name.to_string(),
        });
    }
    Ok(())
}
