//! Integration tests driving the otool and install_name_tool wrappers.
//!
//! The tools are replaced by shell scripts: the fake otool prints a canned
//! listing per file name, and the fake install_name_tool logs its arguments
//! and applies `-change` to that listing, so a second otool run observes the
//! rewrite.

use dylib_bundle::{
    bundle, get_all_dependencies, get_library_dependencies, BundleConfig, Otool, PrefixFilter,
    Traversal,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SYSTEM_LIB: &str = "/usr/lib/libSystem.B.dylib";

struct FakeToolchain {
    temp: TempDir,
    listings: PathBuf,
    log: PathBuf,
    otool: PathBuf,
    install_name_tool: PathBuf,
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

impl FakeToolchain {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let listings = temp.path().join("listings");
        let bin = temp.path().join("bin");
        fs::create_dir_all(&listings).unwrap();
        fs::create_dir_all(&bin).unwrap();
        let log = temp.path().join("install_name_tool.log");

        let otool = bin.join("otool");
        write_script(
            &otool,
            &format!(
                r#"f="{listings}/$(basename "$2").txt"
if [ -f "$f" ]; then
  cat "$f"
else
  echo "$2: is not an object file"
  exit 1
fi
"#,
                listings = listings.display()
            ),
        );

        let install_name_tool = bin.join("install_name_tool");
        write_script(
            &install_name_tool,
            &format!(
                r#"printf '%s\n' "$*" >> "{log}"
if [ "$1" = "-change" ]; then
  f="{listings}/$(basename "$4").txt"
  if [ -f "$f" ]; then
    sed "s|$2|$3|g" "$f" > "$f.tmp" && mv "$f.tmp" "$f"
  fi
fi
"#,
                log = log.display(),
                listings = listings.display()
            ),
        );

        Self {
            temp,
            listings,
            log,
            otool,
            install_name_tool,
        }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Create `path` as a dummy object whose otool listing names `deps`.
    fn object(&self, path: &Path, deps: &[&Path]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "MH_MAGIC").unwrap();

        let mut listing = format!("{}:\n", path.display());
        for dep in deps {
            listing.push_str(&format!(
                "\t{} (compatibility version 1.0.0, current version 1.0.0)\n",
                dep.display()
            ));
        }
        let name = path.file_name().unwrap().to_string_lossy();
        fs::write(self.listings.join(format!("{name}.txt")), listing).unwrap();
    }

    fn patch_log(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn config(&self, app: &Path, prefixes: Vec<PathBuf>, dest: &Path) -> BundleConfig {
        BundleConfig {
            prefixes,
            dest: dest.to_path_buf(),
            otool: self.otool.clone(),
            install_name_tool: self.install_name_tool.clone(),
            ..BundleConfig::new(app)
        }
    }
}

#[test]
fn test_bundle_app_with_foo_and_system() {
    let tools = FakeToolchain::new();
    let prefix = tools.root().join("opt/local/lib");
    let dest = tools.root().join("App.app");
    let app = dest.join("App");
    let foo = prefix.join("libfoo.dylib");
    tools.object(&app, &[&foo, Path::new(SYSTEM_LIB)]);
    tools.object(&foo, &[&foo, Path::new(SYSTEM_LIB)]);

    let summary = bundle(&tools.config(&app, vec![prefix.clone()], &dest)).unwrap();

    // discovered set holds only what the prefix filter let through
    assert_eq!(summary.libraries.len(), 2);
    assert!(summary.libraries.contains(&foo));
    assert_eq!(summary.moves.len(), 1);
    assert_eq!(summary.moves[0].original, foo);
    assert_eq!(
        summary.moves[0].link,
        PathBuf::from("@loader_path/libfoo.dylib")
    );
    assert!(dest.join("libfoo.dylib").exists());
    assert!(summary.is_success());
    assert!(summary.ids.is_none());

    let deps = get_library_dependencies(&tools.otool, &app).unwrap();
    assert_eq!(
        deps,
        vec![
            PathBuf::from("@loader_path/libfoo.dylib"),
            PathBuf::from(SYSTEM_LIB),
        ]
    );
    let filter = PrefixFilter::new([&prefix]);
    assert!(deps.iter().all(|d| !filter.matches(d)));

    assert!(tools.patch_log().iter().all(|l| !l.starts_with("-id")));
}

#[test]
fn test_recursive_bundle_with_ids() {
    let tools = FakeToolchain::new();
    let prefix = tools.root().join("opt/local/lib");
    let dest = tools.root().join("dist");
    let app = dest.join("App");
    let foo = prefix.join("libfoo.dylib");
    let bar = prefix.join("libbar.dylib");
    tools.object(&app, &[&foo, Path::new(SYSTEM_LIB)]);
    tools.object(&foo, &[&foo, &bar, Path::new(SYSTEM_LIB)]);
    tools.object(&bar, &[&bar, &foo]);

    let config = BundleConfig {
        traversal: Traversal::Recursive,
        update_ids: true,
        ..tools.config(&app, vec![prefix.clone()], &dest)
    };
    let summary = bundle(&config).unwrap();

    assert_eq!(summary.moves.len(), 2);
    // 2 moves x (App + 2 copies)
    assert_eq!(summary.references.applied, 6);
    assert_eq!(summary.ids.as_ref().map(|r| r.applied), Some(2));

    let log = tools.patch_log();
    assert!(log.contains(&format!(
        "-id libbar.dylib {}",
        dest.join("libbar.dylib").display()
    )));
    assert!(log.contains(&format!(
        "-id libfoo.dylib {}",
        dest.join("libfoo.dylib").display()
    )));

    let foo_deps = get_library_dependencies(&tools.otool, &dest.join("libfoo.dylib")).unwrap();
    assert!(foo_deps.contains(&PathBuf::from("@loader_path/libbar.dylib")));
    assert!(!foo_deps.contains(&bar));
}

#[test]
fn test_direct_only_skips_transitive_libraries() {
    let tools = FakeToolchain::new();
    let prefix = tools.root().join("opt/local/lib");
    let dest = tools.root().join("dist");
    let app = dest.join("App");
    let foo = prefix.join("libfoo.dylib");
    let bar = prefix.join("libbar.dylib");
    tools.object(&app, &[&foo]);
    tools.object(&foo, &[&bar]);
    tools.object(&bar, &[]);

    let summary = bundle(&tools.config(&app, vec![prefix], &dest)).unwrap();

    assert_eq!(summary.moves.len(), 1);
    assert!(!dest.join("libbar.dylib").exists());
}

#[test]
fn test_empty_prefix_list_leaves_binary_alone() {
    let tools = FakeToolchain::new();
    let dest = tools.root().join("dist");
    let app = dest.join("App");
    let foo = tools.root().join("opt/local/lib/libfoo.dylib");
    tools.object(&app, &[&foo, Path::new(SYSTEM_LIB)]);
    tools.object(&foo, &[]);
    let before = fs::read(&app).unwrap();

    let summary = bundle(&tools.config(&app, Vec::new(), &dest)).unwrap();

    assert!(summary.moves.is_empty());
    assert_eq!(summary.references.applied, 0);
    assert!(tools.patch_log().is_empty());
    assert_eq!(fs::read(&app).unwrap(), before);
}

#[test]
fn test_patch_failures_are_reported_not_fatal() {
    let tools = FakeToolchain::new();
    write_script(
        &tools.install_name_tool,
        "echo \"error: $4: malformed object\" >&2\nexit 1\n",
    );
    let prefix = tools.root().join("opt/local/lib");
    let dest = tools.root().join("dist");
    let app = dest.join("App");
    let foo = prefix.join("libfoo.dylib");
    tools.object(&app, &[&foo]);
    tools.object(&foo, &[]);

    let summary = bundle(&tools.config(&app, vec![prefix], &dest)).unwrap();

    assert!(!summary.is_success());
    assert_eq!(summary.failure_count(), 2);
    assert!(summary.references.failures[0]
        .message
        .contains("malformed object"));
    assert!(dest.join("libfoo.dylib").exists());
}

#[test]
fn test_missing_otool_names_the_tool() {
    let tools = FakeToolchain::new();
    let app = tools.root().join("App");
    tools.object(&app, &[]);

    let config = BundleConfig {
        otool: tools.root().join("no-such-otool"),
        ..tools.config(&app, Vec::new(), tools.root())
    };
    let err = format!("{:#}", bundle(&config).unwrap_err());
    assert!(err.contains("no-such-otool"), "got: {}", err);
}

#[test]
fn test_non_object_file() {
    let tools = FakeToolchain::new();
    let text = tools.root().join("notes.txt");
    fs::write(&text, "hello").unwrap();

    let deps = get_library_dependencies(&tools.otool, &text).unwrap();
    assert!(deps.is_empty(), "Expected empty deps, got: {:?}", deps);
}

#[test]
fn test_nonexistent_binary() {
    let tools = FakeToolchain::new();
    let result = get_library_dependencies(&tools.otool, Path::new("/nonexistent/path/App"));
    let err_msg = result.unwrap_err().to_string();
    assert!(
        err_msg.contains("does not exist"),
        "Expected 'does not exist' in error message, got: {}",
        err_msg
    );
}

#[test]
fn test_unfiltered_walk_treats_shared_cache_libraries_as_leaves() {
    let tools = FakeToolchain::new();
    let app = tools.root().join("App");
    let foo = tools.root().join("lib/libfoo.dylib");
    tools.object(&app, &[&foo, Path::new(SYSTEM_LIB)]);
    tools.object(&foo, &[Path::new(SYSTEM_LIB), Path::new("@rpath/libbar.dylib")]);

    let all = get_all_dependencies(&Otool::new(&tools.otool), &app, Traversal::Recursive, None)
        .unwrap();

    assert!(all.contains(Path::new(SYSTEM_LIB)));
    assert!(all.contains(Path::new("@rpath/libbar.dylib")));
    assert!(all.contains(&foo));
    assert_eq!(all.len(), 4);
}
