/// Map a measurement onto one of `2 * levels + 1` steps centred on the
/// middle of `[min, max]`.
///
/// * `levels == 0` passes `value` through untouched.
/// * A missing bound or a zero-width range yields `0.0`.
/// * Otherwise the result is `floor((value - min + unit / 2) / unit) - levels`
///   with `unit = (max - min) / (2 * levels)`.
///
/// Nothing is clamped here: keep `value` inside `[min, max]` to stay within
/// `[-levels, levels]`.
pub fn quantize(value: f64, max: Option<f64>, min: Option<f64>, levels: u32) -> f64 {
    if levels == 0 {
        return value;
    }
    let (Some(max), Some(min)) = (max, min) else {
        return 0.0;
    };
    let unit = (max - min) / (2.0 * levels as f64);
    if unit == 0.0 {
        return 0.0;
    }
    ((value - min + unit / 2.0) / unit).floor() - levels as f64
}
