/// Points awarded for finishing a module version.
///
/// The baseline is one point per block. No correct answers at all scores
/// zero, a perfect run earns a 25% bonus, a single mistake is forgiven, and
/// anything worse scales the baseline by the fraction answered correctly.
/// All divisions truncate.
pub fn compute_points(block_count: i64, question_count: i64, correct_answers: i64) -> i64 {
    let points = block_count;
    let correct_answers = correct_answers.clamp(0, question_count.max(0));

    if question_count > 0 && correct_answers == 0 {
        0
    } else if correct_answers == question_count {
        points + points / 4
    } else if correct_answers == question_count - 1 {
        points
    } else {
        points * correct_answers / question_count
    }
}
