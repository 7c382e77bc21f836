pub mod entry;
#[cfg(test)]
mod entry_test;
pub mod template;

use crate::config::{locate_executable, ConfigErrors};
use entry::ConfigEntry;
use once_cell::sync::Lazy;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// deck keyword naming the solver executable
pub const EXE_KEYWORD: &str = "EXE-FILE";
/// filename format naming the deck itself
pub const INPUT_FILE_FORMAT: &str = "input_file";

/// Solver used when a deck names no executable, or names one that doesn't exist.
/// Taken from `FRACFLOW_SOLVER`, otherwise resolved through `PATH` at launch.
pub static DEFAULT_SOLVER: Lazy<PathBuf> = Lazy::new(|| {
    env::var_os("FRACFLOW_SOLVER")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("apm-lcl-model"))
});

/// map of filename format name -> template
pub type FilenameFormats = BTreeMap<String, String>;

/// One solver input deck together with everything needed to run it.
#[derive(Debug, Clone)]
pub struct JobConfig {
    // every line of the deck in file order
    lines: Vec<ConfigEntry>,
    // keyword -> index into `lines`, active lines win over commented ones
    keywords: BTreeMap<String, usize>,
    filename_formats: FilenameFormats,
    // parameters without a deck line, only visible to filename formats
    format_args: BTreeMap<String, String>,
    ram_requirement: f64,
    executable: Option<PathBuf>,
    output_file: Option<PathBuf>,
    // directory of the parsed template, relative executables resolve against it
    source_dir: Option<PathBuf>,
}

impl JobConfig {
    /// read and parse a template deck from disk
    pub fn parse(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_content(&content);
        config.source_dir = Some(path.parent().unwrap_or(Path::new("")).to_path_buf());
        config.executable = config.executable.take().map(|exec| config.resolve(exec));

        debug!(
            deck = ?path,
            lines = config.lines.len(),
            exec = ?config.executable,
            "Parsed template deck"
        );

        Ok(config)
    }

    /// parse deck content, relative executables are kept as written
    pub fn from_content(content: &str) -> Self {
        let mut config = Self {
            lines: Vec::new(),
            keywords: BTreeMap::new(),
            filename_formats: FilenameFormats::new(),
            format_args: BTreeMap::new(),
            ram_requirement: 0.0,
            executable: None,
            output_file: None,
            source_dir: None,
        };

        for line in content.lines() {
            config.push(ConfigEntry::parse(line));
        }

        config.executable = config
            .get(EXE_KEYWORD)
            .filter(|entry| !entry.is_commented_out())
            .map(ConfigEntry::value)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        config
    }

    fn resolve(&self, exec: PathBuf) -> PathBuf {
        match &self.source_dir {
            Some(dir) if exec.is_relative() => dir.join(exec),
            _ => exec,
        }
    }

    fn push(&mut self, entry: ConfigEntry) {
        let index = self.lines.len();
        let keyword = entry.keyword().to_string();

        if !keyword.is_empty() {
            match self.keywords.get(&keyword) {
                Some(&known)
                    if !self.lines[known].is_commented_out() || entry.is_commented_out() => {}
                _ => {
                    self.keywords.insert(keyword, index);
                }
            }
        }

        self.lines.push(entry);
    }

    pub fn get(&self, keyword: &str) -> Option<&ConfigEntry> {
        self.keywords.get(keyword).map(|&index| &self.lines[index])
    }

    pub fn get_mut(&mut self, keyword: &str) -> Option<&mut ConfigEntry> {
        self.keywords
            .get(keyword)
            .map(|&index| &mut self.lines[index])
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.keywords.contains_key(keyword)
    }

    pub fn filename_formats(&self) -> &FilenameFormats {
        &self.filename_formats
    }

    pub fn set_filename_formats(&mut self, formats: FilenameFormats) {
        self.filename_formats = formats;
    }

    pub fn format_args(&self) -> &BTreeMap<String, String> {
        &self.format_args
    }

    pub fn ram_requirement(&self) -> f64 {
        self.ram_requirement
    }

    pub fn set_ram_requirement(&mut self, ram: f64) {
        self.ram_requirement = ram;
    }

    /// rendered deck path, only known after `render_output_paths`
    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }

    /// short name used in log messages
    pub fn name(&self) -> String {
        self.output_file
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<unrendered deck>".to_string())
    }

    /// Independent copy of this deck. `formats` replaces the filename formats
    /// of the copy, otherwise they are carried over.
    pub fn clone_with_formats(&self, formats: Option<&FilenameFormats>) -> Self {
        let mut copy = self.clone();

        if let Some(formats) = formats {
            copy.filename_formats = formats.clone();
        }

        copy
    }

    /// Set deck values from `params`. Keys without a deck line are kept as
    /// format arguments and never written to the deck.
    pub fn apply_parameters(&mut self, params: &BTreeMap<String, String>) {
        for (key, value) in params {
            match self.get_mut(key) {
                Some(entry) => {
                    entry.set_value(value);
                    entry.set_commented_out(false);

                    if key == EXE_KEYWORD {
                        self.executable = Some(self.resolve(PathBuf::from(value)));
                    }
                }
                None => {
                    self.format_args.insert(key.clone(), value.clone());
                }
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(ConfigEntry::value)
            .or_else(|| self.format_args.get(key).cloned())
    }

    /// Render every filename format against the current deck values and format
    /// arguments. `input_file` becomes the deck path, every other format must
    /// name a deck keyword whose value is replaced and whose line is enabled.
    pub fn render_output_paths(&mut self, create_dirs: bool) -> Result<(), ConfigErrors> {
        // render first so formats never observe each other's results
        let mut rendered = Vec::with_capacity(self.filename_formats.len());

        for (name, format) in &self.filename_formats {
            let path = template::render(format, |key| self.lookup(key)).map_err(|missing| {
                ConfigErrors::MissingFormatKey {
                    key: missing.0,
                    template: format.clone(),
                }
            })?;

            if name != INPUT_FILE_FORMAT && !self.contains(name) {
                return Err(ConfigErrors::UnknownFormatTarget(name.clone()));
            }

            rendered.push((name.clone(), path));
        }

        for (name, path) in rendered {
            if create_dirs {
                if let Some(parent) = Path::new(&path).parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|source| ConfigErrors::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
            }

            if name == INPUT_FILE_FORMAT {
                self.output_file = Some(PathBuf::from(path));
            } else if let Some(entry) = self.get_mut(&name) {
                entry.set_value(&path);
                entry.set_commented_out(false);
            }
        }

        Ok(())
    }

    /// the deck content as written to disk
    pub fn content(&self) -> String {
        let mut content = self
            .lines
            .iter()
            .map(ConfigEntry::output_line)
            .collect::<Vec<_>>()
            .join("\n");
        content.push('\n');

        content
    }

    /// render output paths and write the deck, returning its path
    pub fn write(&mut self, create_dirs: bool) -> Result<PathBuf, ConfigErrors> {
        self.render_output_paths(create_dirs)?;

        let path = self
            .output_file
            .clone()
            .ok_or(ConfigErrors::MissingInputFile)?;

        fs::write(&path, self.content()).map_err(|source| ConfigErrors::Io {
            path: path.clone(),
            source,
        })?;
        debug!(deck = ?path, "Wrote deck");

        Ok(path)
    }

    /// The executable to launch this deck with. A named executable that can't
    /// be found falls back to `DEFAULT_SOLVER`.
    pub fn executable(&self) -> PathBuf {
        match &self.executable {
            Some(exec) if locate_executable(exec).is_some() => exec.clone(),
            Some(exec) => {
                warn!(
                    deck = %self.name(),
                    exec = ?exec,
                    default = ?*DEFAULT_SOLVER,
                    "Executable not found, falling back to the default solver"
                );

                DEFAULT_SOLVER.clone()
            }
            None => DEFAULT_SOLVER.clone(),
        }
    }
}
