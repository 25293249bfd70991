use owo_colors::Rgb;

/// Two-tone palette for startup output: keys dim, values bright.
pub const FG1: Rgb = Rgb(130, 140, 150);
pub const FG2: Rgb = Rgb(220, 230, 240);
