//! Adam optimizer for the head parameters

use ndarray::{Array, Dimension, Zip};

/// Adam hyperparameters and step counter.
///
/// Default: β₁=0.9, β₂=0.999, ε=1e-8
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
}

impl Adam {
    #[must_use]
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
        }
    }

    #[must_use]
    pub fn betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    #[must_use]
    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Advance the timestep; call once per mini-batch before updating slots
    pub fn tick(&mut self) {
        self.t = self.t.saturating_add(1);
    }

    #[must_use]
    pub fn steps(&self) -> i32 {
        self.t
    }
}

/// First and second moment estimates for one parameter array
#[derive(Debug, Clone)]
pub struct AdamSlot<D: Dimension> {
    m: Array<f32, D>,
    v: Array<f32, D>,
}

impl<D: Dimension> AdamSlot<D> {
    #[must_use]
    pub fn zeros_like(param: &Array<f32, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    /// Apply one bias-corrected update of `param` along `grad`
    pub fn update(&mut self, adam: &Adam, param: &mut Array<f32, D>, grad: &Array<f32, D>) {
        let t = adam.t.max(1);
        let correction1 = 1.0 - adam.beta1.powi(t);
        let correction2 = 1.0 - adam.beta2.powi(t);
        let (beta1, beta2) = (adam.beta1, adam.beta2);
        Zip::from(param)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|p, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / correction1;
                let v_hat = *v / correction2;
                *p -= adam.lr * m_hat / (v_hat.sqrt() + adam.eps);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(0.1);
        let mut param = arr1(&[1.0f32, -1.0, 0.0]);
        let mut slot = AdamSlot::zeros_like(&param);
        adam.tick();
        slot.update(&adam, &mut param, &arr1(&[2.0, -0.5, 0.0]));
        // Bias-corrected first step is lr * sign(g)
        assert!((param[0] - 0.9).abs() < 1e-5);
        assert!((param[1] + 0.9).abs() < 1e-5);
        assert_eq!(param[2], 0.0);
    }

    #[test]
    fn test_minimises_quadratic() {
        let mut adam = Adam::new(0.05);
        let mut param = arr1(&[3.0f32, -2.0]);
        let mut slot = AdamSlot::zeros_like(&param);
        for _ in 0..500 {
            let grad = param.mapv(|x| 2.0 * x);
            adam.tick();
            slot.update(&adam, &mut param, &grad);
        }
        assert!(param.iter().all(|x| x.abs() < 0.1), "{param:?}");
        assert_eq!(adam.steps(), 500);
    }
}
