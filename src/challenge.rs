//! Detection of anti-bot interstitial pages in rendered HTML.
//!
//! The classifier is a fixed set of case-insensitive substring markers known
//! to appear on challenge interstitials: the interstitial title, the
//! verification script path, and the in-page challenge-options token. An
//! unlisted interstitial flavor is reported `Clear`; that false negative is an
//! accepted limitation rather than something to retry for.

/// Transient classification of one rendered-HTML read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// The page content is the origin's own document.
    Clear,
    /// An interstitial is still in place of the requested content.
    Challenged,
}

/// Markers matched case-insensitively against the rendered HTML.
const CHALLENGE_MARKERS: [&str; 3] = ["just a moment", "challenge-platform", "_cf_chl_opt"];

/// Classify rendered HTML. Pure function, no state.
pub fn classify(html: &str) -> ChallengeState {
    let lowered = html.to_ascii_lowercase();
    if CHALLENGE_MARKERS.iter().any(|m| lowered.contains(m)) {
        ChallengeState::Challenged
    } else {
        ChallengeState::Clear
    }
}
