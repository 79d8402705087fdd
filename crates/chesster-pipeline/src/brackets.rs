/// Ratings backed by a pre-trained base model, ascending.
pub const RATING_BRACKETS: [u32; 9] = [1100, 1200, 1300, 1400, 1500, 1600, 1700, 1800, 1900];

/// Bracket nearest to `rating`; ties go to the lower bracket and out-of-range ratings clamp.
pub fn closest_bracket(rating: u32) -> u32 {
    let mut best = RATING_BRACKETS[0];
    let mut best_distance = best.abs_diff(rating);
    for bracket in RATING_BRACKETS.iter().copied().skip(1) {
        let distance = bracket.abs_diff(rating);
        if distance < best_distance {
            best = bracket;
            best_distance = distance;
        }
    }
    best
}

pub fn base_model_filename(bracket: u32) -> String {
    format!("maia-{bracket}.pb.gz")
}
