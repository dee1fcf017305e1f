use rand::Rng;

/// Draws from N(0, sd²) with the Box-Muller transform.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, sd: f64) -> f64 {
    if sd <= 0.0 {
        return 0.0;
    }
    // u1 in (0, 1] keeps ln() finite.
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z * sd
}
