#[cfg(test)]
mod tests {
    use crate::config::Config;
    use std::fs::File;
    use std::time::Duration;

    #[test]
    fn test_loading_config_file() {
        match File::open("src/test/config/good.json") {
            Ok(f) => match Config::parse(f) {
                Ok(_) => {}
                Err(e) => panic!("{}", e),
            },
            Err(e) => panic!("{}", e),
        }
    }

    #[test]
    fn test_parsing_config_files() {
        let f = File::open("src/test/config/good.json").unwrap();
        match Config::parse(f) {
            Ok(cfg) => {
                assert_eq!(cfg.tables["pf_table"], vec!["a.example", "192.0.2.7"]);
                assert_eq!(cfg.tables["other_table"], vec!["b.example"]);
                assert_eq!(cfg.flush, 300);
                assert_eq!(cfg.verbose, 1);
                assert_eq!(cfg.delete_after, Duration::from_secs(300));
            }
            Err(e) => panic!("{}", e),
        }
    }

    #[test]
    fn test_parsing_bad_config_files() {
        let f = File::open("src/test/config/bad.json").unwrap();
        match Config::parse(f) {
            Ok(_) => panic!("parsing a malformed config file must fail"),
            Err(_) => {}
        }
    }
}
