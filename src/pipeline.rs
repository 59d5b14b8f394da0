use std::{
    fs,
    path::{Path, PathBuf},
};

use lightningcss::{
    stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet},
    targets::{Browsers, Targets},
};
use tracing::{debug, info};

use crate::config::StylesConfig;
use crate::error::{CascadeError, Result};

/// Compiles SCSS sources to CSS and rewrites the result for the configured
/// browser targets (vendor prefixing, syntax lowering).
pub struct StylePipeline {
    source_dir: PathBuf,
    out_dir: PathBuf,
    targets: Targets,
}

impl StylePipeline {
    pub fn new(styles: &StylesConfig) -> Result<Self> {
        let browsers = Browsers::from_browserslist(&styles.browsers).map_err(|e| {
            CascadeError::Compile(format!("invalid browserslist query: {}", e))
        })?;

        Ok(Self {
            source_dir: styles.source_dir.clone(),
            out_dir: styles.out_dir.clone(),
            targets: Targets {
                browsers,
                ..Targets::default()
            },
        })
    }

    /// Compiles every top-level `.scss` root and writes the results to the
    /// output directory, returning the written paths.
    ///
    /// All roots are compiled to memory before anything is written, so a
    /// failing source leaves the output directory untouched.
    pub fn compile(&self) -> Result<Vec<PathBuf>> {
        let roots = self.compile_roots()?;

        if roots.is_empty() {
            info!(
                "no .scss sources found under {}",
                self.source_dir.display()
            );
            return Ok(Vec::new());
        }

        let mut compiled: Vec<(PathBuf, String)> = Vec::new();
        for root in &roots {
            let css = self.compile_one(root)?;
            let stem = root
                .file_stem()
                .ok_or_else(|| {
                    CascadeError::Compile(format!("{}: no file stem", root.display()))
                })?
                .to_string_lossy();
            compiled.push((self.out_dir.join(format!("{}.css", stem)), css));
        }

        fs::create_dir_all(&self.out_dir)?;

        let mut written = Vec::new();
        for (path, css) in compiled {
            fs::write(&path, css)?;
            debug!("wrote {}", path.display());
            written.push(path);
        }

        Ok(written)
    }

    /// Top-level `.scss` files, excluding `_`-prefixed partials. Partials
    /// are still reachable through `@use`/`@import` and are covered by the
    /// recursive watch glob.
    fn compile_roots(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.source_dir.join("*.scss");
        let mut roots = Vec::new();

        for entry in glob::glob(&pattern.to_string_lossy())? {
            let path = entry.map_err(|e| {
                CascadeError::Compile(format!("failed to expand glob: {}", e))
            })?;

            let is_partial = path
                .file_name()
                .map(|name| name.to_string_lossy().starts_with('_'))
                .unwrap_or(false);

            if !is_partial && path.is_file() {
                roots.push(path);
            }
        }

        roots.sort();
        Ok(roots)
    }

    fn compile_one(&self, path: &Path) -> Result<String> {
        let options = grass::Options::default()
            .style(grass::OutputStyle::Expanded)
            .load_path(&self.source_dir);

        let css = grass::from_path(path, &options)
            .map_err(|e| CascadeError::Compile(format!("{}: {}", path.display(), e)))?;

        self.rewrite_for_targets(&css, path)
    }

    fn rewrite_for_targets(&self, css: &str, origin: &Path) -> Result<String> {
        let mut sheet = StyleSheet::parse(css, ParserOptions::default())
            .map_err(|e| CascadeError::Compile(format!("{}: {}", origin.display(), e)))?;

        sheet
            .minify(MinifyOptions {
                targets: self.targets.clone(),
                ..MinifyOptions::default()
            })
            .map_err(|e| CascadeError::Compile(format!("{}: {}", origin.display(), e)))?;

        let output = sheet
            .to_css(PrinterOptions {
                targets: self.targets.clone(),
                ..PrinterOptions::default()
            })
            .map_err(|e| CascadeError::Compile(format!("{}: {}", origin.display(), e)))?;

        Ok(output.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_for(dir: &Path, browsers: &[&str]) -> StylePipeline {
        let styles = StylesConfig {
            source_dir: dir.join("sass"),
            out_dir: dir.join("css"),
            browsers: browsers.iter().map(|b| b.to_string()).collect(),
        };
        StylePipeline::new(&styles).unwrap()
    }

    #[test]
    fn compiles_scss_with_vendor_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sass")).unwrap();
        fs::write(
            dir.path().join("sass/main.scss"),
            ".toolbar {\n  user-select: none;\n  .label { color: red; }\n}\n",
        )
        .unwrap();

        let pipeline = pipeline_for(dir.path(), &["safari >= 10"]);
        let written = pipeline.compile().unwrap();

        assert_eq!(written, vec![dir.path().join("css/main.css")]);
        let css = fs::read_to_string(&written[0]).unwrap();
        assert!(css.contains("-webkit-user-select"), "css was: {}", css);
        assert!(css.contains(".toolbar .label"), "nesting flattened: {}", css);
    }

    #[test]
    fn partials_resolve_but_are_not_compile_roots() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sass")).unwrap();
        fs::write(dir.path().join("sass/_colors.scss"), "$primary: #336699;\n").unwrap();
        fs::write(
            dir.path().join("sass/site.scss"),
            "@use \"colors\";\nbody { background: colors.$primary; }\n",
        )
        .unwrap();

        let pipeline = pipeline_for(dir.path(), &["defaults"]);
        let written = pipeline.compile().unwrap();

        assert_eq!(written, vec![dir.path().join("css/site.css")]);
        assert!(!dir.path().join("css/_colors.css").exists());
        let css = fs::read_to_string(&written[0]).unwrap();
        assert!(css.contains("body"), "css was: {}", css);
    }

    #[test]
    fn syntax_error_leaves_destination_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sass")).unwrap();
        fs::write(dir.path().join("sass/good.scss"), "a { color: blue; }\n").unwrap();
        fs::write(dir.path().join("sass/broken.scss"), "a { color: ;;\n").unwrap();

        let pipeline = pipeline_for(dir.path(), &["defaults"]);
        let err = pipeline.compile().unwrap_err();

        assert!(matches!(err, CascadeError::Compile(_)));
        assert!(
            !dir.path().join("css").exists(),
            "no output may be written when any root fails"
        );
    }

    #[test]
    fn missing_import_is_a_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sass")).unwrap();
        fs::write(dir.path().join("sass/main.scss"), "@use \"nope\";\n").unwrap();

        let pipeline = pipeline_for(dir.path(), &["defaults"]);
        assert!(matches!(
            pipeline.compile(),
            Err(CascadeError::Compile(_))
        ));
    }

    #[test]
    fn empty_source_dir_compiles_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sass")).unwrap();

        let pipeline = pipeline_for(dir.path(), &["defaults"]);
        assert!(pipeline.compile().unwrap().is_empty());
        assert!(!dir.path().join("css").exists());
    }
}
