use std::path::{Path, PathBuf};

/// Behaviour keyed on the database name (last argument):
/// `alpha` reports an unknown database, `noisy` warns on stderr but exits 0,
/// `silent` exits non-zero without output, `slow` hangs, `vanish` exits 0
/// after deleting its own output file. Anything else
/// succeeds and echoes its argv and `MYSQL_PWD` into the dump.
const FAKE_MYSQLDUMP: &str = r#"
for last; do :; done
case "$last" in
  alpha) echo "mysqldump: Got error: 1049: Unknown database 'alpha' when selecting the database" >&2; exit 2 ;;
  noisy) echo "mysqldump: [Warning] Using a password on the command line interface can be insecure." >&2 ;;
  silent) exit 3 ;;
  slow) exec sleep 30 ;;
  vanish) rm -f "$(readlink /proc/$$/fd/1)"; exit 0 ;;
esac
echo "-- dump of $last"
echo "args: $*"
echo "pwd: $MYSQL_PWD"
echo "CREATE TABLE t (id INT);"
echo "INSERT INTO t VALUES (1),(2),(3);"
"#;

/// Write the fake dump utility into `dir`. Returns the program and the extra
/// arguments to configure; running it through `/bin/sh` avoids exec'ing a
/// file that was just written.
pub(crate) fn fake_dump_utility(dir: &Path) -> (PathBuf, Vec<String>) {
    let script = dir.join("fake-mysqldump.sh");
    std::fs::write(&script, FAKE_MYSQLDUMP).unwrap();
    (
        PathBuf::from("/bin/sh"),
        vec![script.to_string_lossy().to_string()],
    )
}
