//! Merge generated files with the injected LICENSE and README.
//!
//! Pure and deterministic: the year, holder and URLs come in as inputs,
//! nothing is read from the clock or the environment.

use crate::error::AssemblyError;
use crate::types::{AssembledFileSet, GeneratedFileSet};

pub const LICENSE_PATH: &str = "LICENSE";
pub const README_PATH: &str = "README.md";

/// MIT licence text for one copyright holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseTemplate {
    pub year: i32,
    pub holder: String,
}

impl LicenseTemplate {
    pub fn render(&self) -> String {
        format!(
            "MIT License

Copyright (c) {year} {holder}

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the \"Software\"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
",
            year = self.year,
            holder = self.holder,
        )
    }
}

/// README describing the generated app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadmeTemplate {
    pub title: String,
    pub brief: String,
    pub round: u32,
    pub pages_url: String,
}

impl ReadmeTemplate {
    /// Render with a listing of `files` (paths, in order).
    pub fn render<'a>(&self, files: impl IntoIterator<Item = &'a str>) -> String {
        let mut out = format!("# {}\n\n## Summary\n\n{}\n\n", self.title, self.brief.trim());
        out.push_str(&format!(
            "## Live site\n\n{}\n\nThis repository was last updated in round {}.\n\n",
            self.pages_url, self.round
        ));
        out.push_str("## Files\n\n");
        for path in files {
            out.push_str(&format!("- `{path}`\n"));
        }
        out.push_str(
            "\n## Usage\n\nOpen the live site above, or serve the repository root with any static \
             file server and open `index.html`.\n\n## License\n\nMIT, see [LICENSE](LICENSE).\n",
        );
        out
    }
}

/// Merge `generated` with a rendered LICENSE and README.
///
/// A generated file at the same path (compared case-insensitively, so
/// `license` or `readme.md` count too) wins over the injected one and is
/// recorded in [`AssembledFileSet::preserved`].
pub fn assemble(
    generated: &GeneratedFileSet,
    license: &LicenseTemplate,
    readme: &ReadmeTemplate,
) -> Result<AssembledFileSet, AssemblyError> {
    if generated.is_empty() {
        return Err(AssemblyError::EmptyGeneratedSet);
    }

    let mut set = AssembledFileSet::default();
    for (path, content) in generated.iter() {
        set.files.insert(path.to_string(), content.to_string());
    }

    let taken = |path: &str| generated.paths().any(|p| p.eq_ignore_ascii_case(path));

    if taken(LICENSE_PATH) {
        set.preserved.push(LICENSE_PATH.to_string());
    } else {
        set.files.insert(LICENSE_PATH.to_string(), license.render());
        set.injected.push(LICENSE_PATH.to_string());
    }

    if taken(README_PATH) {
        set.preserved.push(README_PATH.to_string());
    } else {
        // Listing includes the README itself so it matches the final tree.
        let mut listing: Vec<&str> = set.files.keys().map(String::as_str).collect();
        listing.push(README_PATH);
        listing.sort_unstable();
        let body = readme.render(listing);
        set.files.insert(README_PATH.to_string(), body);
        set.injected.push(README_PATH.to_string());
    }

    Ok(set)
}
