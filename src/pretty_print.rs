use std::fmt::{self, Debug, Display};

use faer::prelude::*;

use crate::{Component, core::BufferPool};

/// Min, max and the first four moments of a buffer.
#[derive(Clone, Copy, PartialEq)]
pub struct MomentStatistics {
    pub count: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub stddev: f32,
    pub skewness: f32,
    pub kurtosis: f32,
}

impl MomentStatistics {
    pub fn from_values(values: impl IntoIterator<Item = f32> + Clone) -> Self {
        let mut count = 0usize;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        for x in values.clone() {
            count += 1;
            min = min.min(x);
            max = max.max(x);
            sum += x as f64;
        }
        if count == 0 {
            return Self {
                count,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                stddev: 0.0,
                skewness: 0.0,
                kurtosis: 0.0,
            };
        }
        let n = count as f64;
        let mean = sum / n;
        let (mut m2, mut m3, mut m4) = (0.0f64, 0.0f64, 0.0f64);
        for x in values {
            let d = x as f64 - mean;
            m2 += d * d;
            m3 += d * d * d;
            m4 += d * d * d * d;
        }
        let variance = m2 / n;
        let skewness = (m3 / n) / variance.powf(1.5);
        // Excess kurtosis, 0 for a normal distribution.
        let kurtosis = (m4 / n) / (variance * variance) - 3.0;
        Self {
            count,
            min,
            max,
            mean: mean as f32,
            stddev: variance.sqrt() as f32,
            skewness: skewness as f32,
            kurtosis: kurtosis as f32,
        }
    }

    pub fn from_mat(mat: MatRef<f32>) -> Self {
        Self::from_values(
            (0..mat.nrows()).flat_map(move |i| (0..mat.ncols()).map(move |j| mat[(i, j)])),
        )
    }

    pub fn from_col(col: ColRef<f32>) -> Self {
        Self::from_values((0..col.nrows()).map(move |i| col[i]))
    }
}

impl Debug for MomentStatistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for MomentStatistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.count == 0 {
            return write!(f, "( empty )");
        }
        write!(
            f,
            "( min {}, max {}, mean {}, stddev {}, skewness {}, kurtosis {} )",
            self.min, self.max, self.mean, self.stddev, self.skewness, self.kurtosis
        )
    }
}

/// Topology report: dims and parameter counts of every component.
pub struct PrettyPrintTopology<'a> {
    components: &'a [Box<dyn Component>],
}

impl<'a> PrettyPrintTopology<'a> {
    pub fn new(components: &'a [Box<dyn Component>]) -> Self {
        Self { components }
    }
}

impl Display for PrettyPrintTopology<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let components = self.components;
        let num_params: usize = components
            .iter()
            .filter_map(|c| c.as_updatable())
            .map(|u| u.num_params())
            .sum();
        writeln!(f, "num-components {}", components.len())?;
        match (components.first(), components.last()) {
            (Some(first), Some(last)) => {
                writeln!(f, "input-dim {}", first.input_dim())?;
                writeln!(f, "output-dim {}", last.output_dim())?;
            }
            _ => {
                writeln!(f, "input-dim -")?;
                writeln!(f, "output-dim -")?;
            }
        }
        writeln!(
            f,
            "number-of-parameters {} millions",
            num_params as f32 / 1e6
        )?;
        for (i, c) in components.iter().enumerate() {
            writeln!(
                f,
                "component {} : {}, input-dim {}, output-dim {}, {}",
                i + 1,
                c.kind(),
                c.input_dim(),
                c.output_dim(),
                c.info()
            )?;
        }
        Ok(())
    }
}

/// Gradient report of every component.
pub struct PrettyPrintGradient<'a> {
    components: &'a [Box<dyn Component>],
}

impl<'a> PrettyPrintGradient<'a> {
    pub fn new(components: &'a [Box<dyn Component>]) -> Self {
        Self { components }
    }
}

impl Display for PrettyPrintGradient<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "\n### Gradient stats :")?;
        for (i, c) in self.components.iter().enumerate() {
            writeln!(f, "Component {} : {}, {}", i + 1, c.kind(), c.info_gradient())?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Moment statistics of the forward or backward buffers at every boundary.
pub struct PrettyPrintBuffers<'a> {
    components: &'a [Box<dyn Component>],
    buffers: &'a BufferPool,
    direction: Direction,
}

impl<'a> PrettyPrintBuffers<'a> {
    pub fn forward(components: &'a [Box<dyn Component>], buffers: &'a BufferPool) -> Self {
        Self {
            components,
            buffers,
            direction: Direction::Forward,
        }
    }

    pub fn backward(components: &'a [Box<dyn Component>], buffers: &'a BufferPool) -> Self {
        Self {
            components,
            buffers,
            direction: Direction::Backward,
        }
    }
}

impl Display for PrettyPrintBuffers<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (title, input_label, output_label) = match self.direction {
            Direction::Forward => ("Forward propagation buffer content", "output", "output"),
            Direction::Backward => ("Backward propagation buffer content", "diff", "diff-output"),
        };
        let stats = |index: usize| {
            self.buffers
                .boundary(index)
                .map(|boundary| match self.direction {
                    Direction::Forward => MomentStatistics::from_mat(boundary.activation),
                    Direction::Backward => MomentStatistics::from_mat(boundary.diff),
                })
                .unwrap_or(MomentStatistics::from_values([]))
        };
        writeln!(f, "\n### {title} :")?;
        writeln!(f, "[0] {input_label} of <Input> {}", stats(0))?;
        for (i, c) in self.components.iter().enumerate() {
            writeln!(f, "[{}] {output_label} of {} {}", i + 1, c.kind(), stats(i + 1))?;
            let nested = match self.direction {
                Direction::Forward => c.info_propagate(),
                Direction::Backward => c.info_backpropagate(),
            };
            if !nested.is_empty() {
                writeln!(f, "{nested}")?;
            }
        }
        Ok(())
    }
}
