//! Pre/post processor pipeline.
//!
//! Pre-processors translate caller-facing `(x, y, params)` into the
//! representation the callbacks were written for; post-processors translate
//! integrated output back. Both chains run front to back, each element
//! consuming the previous element's output. An empty chain is the identity.

use std::fmt;
use std::sync::Arc;

use crate::callback::Matrix;

/// Independent-variable input of an integration call.
///
/// | variant | meaning |
/// |---------|---------|
/// | `Endpoint(x)` | integrate from `0` to `x` |
/// | `Points([x])` | same as `Endpoint(x)` |
/// | `Points([x0, x1])` | start/end pair (adaptive unless forced) |
/// | `Points([x0, .., xn])` | explicit output grid |
#[derive(Debug, Clone, PartialEq)]
pub enum XSpec {
    /// Single endpoint, start implied to be zero.
    Endpoint(f64),
    /// Pair or explicit grid.
    Points(Vec<f64>),
}

impl XSpec {
    /// Expand a lone endpoint into the pair `(0, x)`.
    pub fn normalize(self) -> Vec<f64> {
        match self {
            Self::Endpoint(x) => vec![0.0, x],
            Self::Points(points) if points.len() == 1 => vec![0.0, points[0]],
            Self::Points(points) => points,
        }
    }
}

impl From<f64> for XSpec {
    fn from(x: f64) -> Self {
        Self::Endpoint(x)
    }
}

impl From<(f64, f64)> for XSpec {
    fn from((x0, x1): (f64, f64)) -> Self {
        Self::Points(vec![x0, x1])
    }
}

impl From<Vec<f64>> for XSpec {
    fn from(points: Vec<f64>) -> Self {
        Self::Points(points)
    }
}

impl From<&[f64]> for XSpec {
    fn from(points: &[f64]) -> Self {
        Self::Points(points.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for XSpec {
    fn from(points: [f64; N]) -> Self {
        Self::Points(points.to_vec())
    }
}

impl<const N: usize> From<&[f64; N]> for XSpec {
    fn from(points: &[f64; N]) -> Self {
        Self::Points(points.to_vec())
    }
}

/// An `(x, y, params)` triple flowing through the pipeline.
///
/// Before integration `y` holds the initial state as a single row; after
/// integration it holds one row per sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Triple {
    pub x: Vec<f64>,
    pub y: Matrix,
    pub params: Vec<f64>,
}

impl Triple {
    pub fn new(x: Vec<f64>, y: Matrix, params: Vec<f64>) -> Self {
        Self { x, y, params }
    }
}

/// A single pipeline stage.
pub type Processor = Arc<dyn Fn(Triple) -> Triple>;

/// Ordered pre- and post-processor chains.
#[derive(Clone, Default)]
pub struct Pipeline {
    pre: Vec<Processor>,
    post: Vec<Processor>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pre-processor to the end of the pre chain.
    pub fn push_pre<F>(&mut self, f: F)
    where
        F: Fn(Triple) -> Triple + 'static,
    {
        self.pre.push(Arc::new(f));
    }

    /// Append a post-processor to the end of the post chain.
    pub fn push_post<F>(&mut self, f: F)
    where
        F: Fn(Triple) -> Triple + 'static,
    {
        self.post.push(Arc::new(f));
    }

    pub fn pre_len(&self) -> usize {
        self.pre.len()
    }

    pub fn post_len(&self) -> usize {
        self.post.len()
    }

    /// Transform caller input into internal values.
    ///
    /// `x` is normalized first, so pre-processors always see at least a
    /// start/end pair.
    pub fn pre_process(&self, x: XSpec, y: Matrix, params: Vec<f64>) -> Triple {
        let triple = Triple::new(x.normalize(), y, params);
        self.pre.iter().fold(triple, |acc, stage| stage(acc))
    }

    /// Transform internal values into caller output.
    ///
    /// Stages may change the width or number of rows of `y`.
    pub fn post_process(&self, triple: Triple) -> Triple {
        self.post.iter().fold(triple, |acc, stage| stage(acc))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("pre", &self.pre.len())
            .field("post", &self.post.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_synthesizes_pair() {
        assert_eq!(XSpec::from(2.5).normalize(), vec![0.0, 2.5]);
        assert_eq!(XSpec::from(vec![7.0]).normalize(), vec![0.0, 7.0]);
        assert_eq!(XSpec::from((1.0, 3.0)).normalize(), vec![1.0, 3.0]);
        assert_eq!(
            XSpec::from([0.0, 0.2, 0.5]).normalize(),
            vec![0.0, 0.2, 0.5]
        );
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline = Pipeline::new();
        let pre = pipeline.pre_process(XSpec::from(1.0), vec![vec![3.0, 4.0]], vec![2.0]);
        assert_eq!(pre.x, vec![0.0, 1.0]);
        assert_eq!(pre.y, vec![vec![3.0, 4.0]]);
        assert_eq!(pre.params, vec![2.0]);

        let post = pipeline.post_process(pre.clone());
        assert_eq!(post, pre);
    }

    #[test]
    fn test_pre_chain_runs_in_order() {
        let mut pipeline = Pipeline::new();
        // Stage 1 doubles x, stage 2 adds one: order matters.
        pipeline.push_pre(|mut t: Triple| {
            t.x.iter_mut().for_each(|x| *x *= 2.0);
            t
        });
        pipeline.push_pre(|mut t: Triple| {
            t.x.iter_mut().for_each(|x| *x += 1.0);
            t
        });

        let pre = pipeline.pre_process(XSpec::from(3.0), vec![vec![1.0]], vec![]);
        assert_eq!(pre.x, vec![1.0, 7.0]);
    }

    #[test]
    fn test_post_chain_is_not_reversed() {
        let mut pipeline = Pipeline::new();
        pipeline.push_post(|mut t: Triple| {
            t.params.push(1.0);
            t
        });
        pipeline.push_post(|mut t: Triple| {
            t.params.push(2.0);
            t
        });

        let out = pipeline.post_process(Triple::default());
        assert_eq!(out.params, vec![1.0, 2.0]);
    }

    #[test]
    fn test_post_processor_may_change_shape() {
        let mut pipeline = Pipeline::new();
        // Expand a reduced state (y0) into (y0, 1 - y0).
        pipeline.push_post(|t: Triple| {
            let y = t.y.iter().map(|row| vec![row[0], 1.0 - row[0]]).collect();
            Triple::new(t.x, y, t.params)
        });

        let out = pipeline.post_process(Triple::new(
            vec![0.0, 1.0],
            vec![vec![0.25], vec![0.75]],
            vec![],
        ));
        assert_eq!(out.y, vec![vec![0.25, 0.75], vec![0.75, 0.25]]);
    }
}
