//! Axis response curves.

/// Pure, sign-preserving response curve over [-1.0, 1.0].
pub trait AxisTransform: Send + Sync {
    fn apply(&self, value: f64) -> f64;
}

impl<F> AxisTransform for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn apply(&self, value: f64) -> f64 {
        self(value)
    }
}

/// `sign(x) * sqrt(|x|)`: more resolution near full scale.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquareRootAxisTransform;

impl AxisTransform for SquareRootAxisTransform {
    fn apply(&self, value: f64) -> f64 {
        let y = value.abs().min(1.0).sqrt();
        if value < 0.0 { -y } else { y }
    }
}

/// Cubic curve fitted through `(0, min) (0.45, mid) (0.5, mid) (0.55, mid) (1, 1)`.
///
/// `min` is the output just past the deadband (the power needed to overcome
/// static friction), `mid` flattens the curve around half stick.
#[derive(Debug, Clone, Copy)]
pub struct CubicAxisTransform {
    /// Coefficients, lowest order first.
    coeffs: [f64; 4],
}

impl CubicAxisTransform {
    pub fn new(min_power: f64, mid_power: f64) -> Self {
        let min = min_power.abs();
        let mid = mid_power.abs();
        let xs = [0.0, 0.45, 0.5, 0.55, 1.0];
        let ys = [min, mid, mid, mid, 1.0];
        Self {
            coeffs: fit_cubic(&xs, &ys),
        }
    }

    pub fn coefficients(&self) -> [f64; 4] {
        self.coeffs
    }
}

impl AxisTransform for CubicAxisTransform {
    fn apply(&self, value: f64) -> f64 {
        let x = value.abs();
        let [d, c, b, a] = self.coeffs;
        let y = (((a * x + b) * x + c) * x + d).clamp(-1.0, 1.0);
        if value < 0.0 { -y } else { y }
    }
}

/// Least-squares cubic via the normal equations and Gaussian elimination
/// with partial pivoting.
fn fit_cubic(xs: &[f64], ys: &[f64]) -> [f64; 4] {
    const N: usize = 4;

    // sums[k] = Σ x^k for k in 0..=6
    let mut sums = [0.0f64; 2 * N - 1];
    for &x in xs {
        let mut p = 1.0;
        for s in sums.iter_mut() {
            *s += p;
            p *= x;
        }
    }

    let mut m = [[0.0f64; N + 1]; N];
    for (i, row) in m.iter_mut().enumerate() {
        for j in 0..N {
            row[j] = sums[i + j];
        }
        row[N] = xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| x.powi(i as i32) * y)
            .sum();
    }

    for col in 0..N {
        let pivot = (col..N)
            .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot);
        for row in col + 1..N {
            let t = m[row][col] / m[col][col];
            for k in col..=N {
                m[row][k] -= t * m[col][k];
            }
        }
    }

    let mut coeffs = [0.0f64; N];
    for i in (0..N).rev() {
        let mut acc = m[i][N];
        for j in i + 1..N {
            acc -= m[i][j] * coeffs[j];
        }
        coeffs[i] = acc / m[i][i];
    }
    coeffs
}
