//! Host-side shape algebra on concrete extent lists.
//!
//! These functions define the runtime meaning of the shape operations. The reference
//! interpreter executes `shape_broadcast` and `minimum_broadcast_shapes` with them, and
//! the branch planner uses them to predict which specialization a set of shapes selects.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("extents {lhs} and {rhs} are not broadcast-compatible at axis {axis}")]
    Incompatible { axis: usize, lhs: usize, rhs: usize },
    #[error("shape of rank {rank} cannot be broadcast to rank {target}")]
    RankTooLarge { rank: usize, target: usize },
    #[error("element count overflows")]
    Overflow,
}

/// Product of extents; the empty shape has one element.
pub fn num_elements(shape: &[usize]) -> Result<usize, ShapeError> {
    shape
        .iter()
        .try_fold(1usize, |acc, extent| acc.checked_mul(*extent))
        .ok_or(ShapeError::Overflow)
}

/// A shape is scalar-like when it describes exactly one element.
pub fn is_scalar_like(shape: &[usize]) -> bool {
    num_elements(shape) == Ok(1)
}

pub fn max_rank<S: AsRef<[usize]>>(shapes: &[S]) -> usize {
    shapes
        .iter()
        .map(|shape| shape.as_ref().len())
        .max()
        .unwrap_or(0)
}

/// Left-pads `shape` with unit extents up to `rank`.
pub fn broadcast_to_rank(shape: &[usize], rank: usize) -> Result<Vec<usize>, ShapeError> {
    if shape.len() > rank {
        return Err(ShapeError::RankTooLarge {
            rank: shape.len(),
            target: rank,
        });
    }
    let mut padded = vec![1usize; rank - shape.len()];
    padded.extend_from_slice(shape);
    Ok(padded)
}

/// Standard broadcasting: shapes are right-aligned and unit extents stretch.
pub fn broadcast_shapes<S: AsRef<[usize]>>(shapes: &[S]) -> Result<Vec<usize>, ShapeError> {
    let rank = max_rank(shapes);
    let mut result = vec![1usize; rank];
    for shape in shapes {
        let shape = shape.as_ref();
        let offset = rank - shape.len();
        for (index, &extent) in shape.iter().enumerate() {
            let axis = offset + index;
            let current = result[axis];
            if current == 1 {
                result[axis] = extent;
            } else if extent != 1 && extent != current {
                return Err(ShapeError::Incompatible {
                    axis,
                    lhs: current,
                    rhs: extent,
                });
            }
        }
    }
    Ok(result)
}

/// Reduces a set of shapes to the lowest ranks that broadcast equivalently.
///
/// Walking right-aligned axes from the innermost outwards: axes that are 1 in every
/// shape are dropped, and neighbouring axes whose "is 1" pattern is identical across all
/// shapes are merged by multiplying their extents. Leading unit extents are then
/// stripped from each result. Every result is a reshape of its input, and broadcasting
/// the results yields a reshape of the original broadcast shape.
pub fn minimum_broadcast_shapes<S: AsRef<[usize]>>(shapes: &[S]) -> Vec<Vec<usize>> {
    let rank = max_rank(shapes);
    let mut reversed: Vec<Vec<usize>> = vec![Vec::new(); shapes.len()];
    let mut previous_pattern: Option<Vec<bool>> = None;

    for axis_from_back in 0..rank {
        let extents: Vec<usize> = shapes
            .iter()
            .map(|shape| {
                let shape = shape.as_ref();
                if axis_from_back < shape.len() {
                    shape[shape.len() - 1 - axis_from_back]
                } else {
                    1
                }
            })
            .collect();
        let pattern: Vec<bool> = extents.iter().map(|extent| *extent == 1).collect();
        if pattern.iter().all(|is_one| *is_one) {
            continue;
        }
        if previous_pattern.as_ref() == Some(&pattern) {
            for (dims, extent) in reversed.iter_mut().zip(extents) {
                if let Some(last) = dims.last_mut() {
                    *last *= extent;
                }
            }
        } else {
            for (dims, extent) in reversed.iter_mut().zip(extents) {
                dims.push(extent);
            }
            previous_pattern = Some(pattern);
        }
    }

    reversed
        .into_iter()
        .map(|mut dims| {
            dims.reverse();
            let leading_ones = dims.iter().take_while(|extent| **extent == 1).count();
            dims.split_off(leading_ones)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_stretches_unit_extents() {
        assert_eq!(broadcast_shapes(&[vec![3, 1], vec![1, 4]]), Ok(vec![3, 4]));
        assert_eq!(broadcast_shapes(&[vec![2, 3], vec![3]]), Ok(vec![2, 3]));
        assert_eq!(broadcast_shapes::<Vec<usize>>(&[]), Ok(vec![]));
        assert_eq!(broadcast_shapes(&[vec![0], vec![1]]), Ok(vec![0]));
    }

    #[test]
    fn broadcast_rejects_mismatched_extents() {
        assert_eq!(
            broadcast_shapes(&[vec![2, 3], vec![4]]),
            Err(ShapeError::Incompatible {
                axis: 1,
                lhs: 3,
                rhs: 4,
            })
        );
    }

    #[test]
    fn minimize_merges_and_strips() {
        assert_eq!(
            minimum_broadcast_shapes(&[vec![3, 1], vec![1, 4]]),
            vec![vec![3, 1], vec![4]]
        );
        assert_eq!(
            minimum_broadcast_shapes(&[vec![2, 3], vec![3]]),
            vec![vec![2, 3], vec![3]]
        );
        assert_eq!(
            minimum_broadcast_shapes(&[vec![2, 3, 4], vec![2, 3, 4]]),
            vec![vec![24], vec![24]]
        );
        assert_eq!(
            minimum_broadcast_shapes(&[vec![1, 5, 1, 6], vec![5, 1, 6]]),
            vec![vec![30], vec![30]]
        );
        assert_eq!(
            minimum_broadcast_shapes(&[vec![1, 1], vec![1]]),
            vec![Vec::<usize>::new(), Vec::new()]
        );
    }

    #[test]
    fn scalar_like_counts_elements() {
        assert!(is_scalar_like(&[]));
        assert!(is_scalar_like(&[1, 1, 1]));
        assert!(!is_scalar_like(&[0]));
        assert!(!is_scalar_like(&[2, 1]));
    }

    #[test]
    fn pad_to_rank() {
        assert_eq!(broadcast_to_rank(&[4], 3), Ok(vec![1, 1, 4]));
        assert_eq!(
            broadcast_to_rank(&[4, 4], 1),
            Err(ShapeError::RankTooLarge { rank: 2, target: 1 })
        );
    }
}
