use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, ShapeBuilder};

/// Columns below this standard deviation are treated as constant.
const CONSTANT_COLUMN_SD: f64 = 1e-12;

/// A design whose columns have zero mean and unit population variance.
///
/// `data` is column-major so coordinate-wise solvers can walk a column as one
/// contiguous slice. Constant columns are zeroed and carry a scale of 0.
#[derive(Debug, Clone)]
pub struct Standardized {
    pub data: Array2<f64>,
    pub means: Array1<f64>,
    pub scales: Array1<f64>,
}

impl Standardized {
    pub fn is_constant(&self, column: usize) -> bool {
        self.scales[column] == 0.0
    }

    /// Indices of the columns that carry any variation.
    pub fn usable_columns(&self) -> Vec<usize> {
        (0..self.scales.len())
            .filter(|&j| !self.is_constant(j))
            .collect()
    }

    /// Maps coefficients fitted on the standardized columns back to the raw scale.
    /// Returns the raw-scale slopes and the intercept that goes with `response_mean`.
    pub fn to_raw_scale(&self, beta: ArrayView1<f64>, response_mean: f64) -> (Array1<f64>, f64) {
        let slopes = Array1::from_iter(beta.iter().zip(self.scales.iter()).map(
            |(&b, &scale)| {
                if scale == 0.0 { 0.0 } else { b / scale }
            },
        ));
        let intercept = response_mean - slopes.dot(&self.means);
        (slopes, intercept)
    }
}

pub fn standardize_columns(x: ArrayView2<f64>) -> Standardized {
    let (n, p) = x.dim();
    let mut data = Array2::<f64>::zeros((n, p).f());
    data.assign(&x);

    let mut means = Array1::<f64>::zeros(p);
    let mut scales = Array1::<f64>::zeros(p);
    if n == 0 {
        return Standardized {
            data,
            means,
            scales,
        };
    }

    for (j, mut column) in data.axis_iter_mut(Axis(1)).enumerate() {
        let mean = column.sum() / n as f64;
        column.mapv_inplace(|v| v - mean);
        let sd = (column.dot(&column) / n as f64).sqrt();
        means[j] = mean;
        if sd > CONSTANT_COLUMN_SD {
            column.mapv_inplace(|v| v / sd);
            scales[j] = sd;
        } else {
            column.fill(0.0);
        }
    }

    Standardized {
        data,
        means,
        scales,
    }
}

/// Centers a response vector, returning the centered copy and its mean.
pub fn center(y: ArrayView1<f64>) -> (Array1<f64>, f64) {
    let mean = y.mean().unwrap_or(0.0);
    (y.mapv(|v| v - mean), mean)
}
