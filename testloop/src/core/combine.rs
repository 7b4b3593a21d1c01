//! Splice user-authored definitions and generated tests into one pytest module.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::python;
use crate::core::types::Framework;

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:from\s+([\w.]+)\s+import\b|import\s+([\w.]+))")
        .expect("import regex should compile")
});

const FLASK_PRELUDE: &str = "import pytest\nfrom flask import Flask, request\n\napp = Flask(__name__)\n";
const FLASK_FIXTURE: &str = "\
@pytest.fixture
def client():
    app.config['TESTING'] = True
    with app.test_client() as client:
        yield client
";

const FASTAPI_PRELUDE: &str = "\
import pytest
from fastapi import FastAPI
from fastapi.testclient import TestClient

app = FastAPI()
";
const FASTAPI_FIXTURE: &str = "\
@pytest.fixture
def client():
    with TestClient(app) as client:
        yield client
";

const DJANGO_PRELUDE: &str = "\
import pytest
from django.conf import settings

if not settings.configured:
    settings.configure(
        DEBUG=True,
        SECRET_KEY='testloop',
        ROOT_URLCONF=__name__,
        ALLOWED_HOSTS=['*'],
        INSTALLED_APPS=['django.contrib.contenttypes', 'django.contrib.auth'],
        DATABASES={'default': {'ENGINE': 'django.db.backends.sqlite3', 'NAME': ':memory:'}},
    )
    import django
    django.setup()

from django.test import Client

urlpatterns = []
";
const DJANGO_FIXTURE: &str = "\
@pytest.fixture
def client():
    return Client()
";

/// Inputs for one combine step.
#[derive(Debug, Clone, Copy)]
pub struct CombineRequest<'a> {
    pub user_source: &'a str,
    pub function_names: &'a [String],
    pub framework: Framework,
    pub test_code: &'a str,
    /// Root module names whose imports survive stripping.
    pub keep_imports: &'a [String],
}

/// Build the executable module. Deterministic; never fails.
pub fn combine(request: &CombineRequest<'_>) -> String {
    let fragment = strip_imports(
        &user_fragment(request.user_source, request.function_names),
        request.keep_imports,
    );
    let fragment = fragment.trim();
    let test_code = request.test_code.trim();

    let bootstrap = match request.framework {
        Framework::Generic => None,
        Framework::Flask => Some((FLASK_PRELUDE, FLASK_FIXTURE)),
        Framework::Fastapi => Some((FASTAPI_PRELUDE, FASTAPI_FIXTURE)),
        Framework::Django => Some((DJANGO_PRELUDE, DJANGO_FIXTURE)),
    };
    match bootstrap {
        None => format!("{fragment}\n\n\n{test_code}\n"),
        Some((prelude, fixture)) => {
            format!("{prelude}\n{fragment}\n\n\n{fixture}\n\n{test_code}\n")
        }
    }
}

/// Imports plus the declarations named in `names`.
///
/// Falls back to the whole source when it does not parse or nothing matches.
pub fn user_fragment(source: &str, names: &[String]) -> String {
    let Some(module) = python::parse_module(source) else {
        return source.to_string();
    };
    let selected = module.select(names);
    if selected.is_empty() {
        return source.to_string();
    }

    let mut parts: Vec<String> = Vec::new();
    if !module.imports.is_empty() {
        parts.push(module.imports.join("\n"));
    }
    parts.extend(selected.iter().map(|decl| decl.text.to_string()));
    parts.join("\n\n\n")
}

/// Remove column-0 import statements unless their root module is in `keep`.
///
/// Parenthesized multi-line imports are removed (or kept) as a unit.
pub fn strip_imports(text: &str, keep: &[String]) -> String {
    let mut out: Vec<&str> = Vec::new();
    // Some(keep?) while inside a parenthesized import.
    let mut continuation: Option<bool> = None;

    for line in text.lines() {
        if let Some(keeping) = continuation {
            if keeping {
                out.push(line);
            }
            if line.contains(')') {
                continuation = None;
            }
            continue;
        }

        let Some(caps) = IMPORT_LINE.captures(line) else {
            out.push(line);
            continue;
        };
        let module = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let root = module.split('.').next().unwrap_or_default();
        let keeping = !root.is_empty() && keep.iter().any(|k| k == root);
        if keeping {
            out.push(line);
        }
        if line.contains('(') && !line.contains(')') {
            continuation = Some(keeping);
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const USER: &str = "\
import math
import requests

def a(x):
    return 'alpha'


def b(x):
    return 'bravo'


def c(x):
    return math.sqrt(x)
";

    #[test]
    fn keeps_only_selected_declarations() {
        let fragment = user_fragment(USER, &names(&["a", "c"]));
        assert!(fragment.contains("return 'alpha'"));
        assert!(fragment.contains("return math.sqrt(x)"));
        assert!(!fragment.contains("return 'bravo'"));
        assert!(!fragment.contains("def b"));
    }

    #[test]
    fn unparsable_source_passes_through() {
        let source = "def broken(:\n    pass\n";
        assert_eq!(user_fragment(source, &names(&["broken"])), source);
    }

    #[test]
    fn no_matching_names_keeps_whole_source() {
        assert_eq!(user_fragment(USER, &names(&["zeta"])), USER);
    }

    #[test]
    fn strips_imports_outside_allow_list() {
        let text = "import math\nimport requests\nfrom os.path import join\nfrom . import sibling\n    import nested\nx = 1";
        let stripped = strip_imports(text, &names(&["math", "os"]));
        assert_eq!(
            stripped,
            "import math\nfrom os.path import join\n    import nested\nx = 1"
        );
    }

    #[test]
    fn strips_parenthesized_imports_as_a_unit() {
        let text = "from pkg import (\n    one,\n    two,\n)\nvalue = 3";
        assert_eq!(strip_imports(text, &[]), "value = 3");
    }

    #[test]
    fn generic_combination_is_fragment_then_tests() {
        let combined = combine(&CombineRequest {
            user_source: "def add(a, b):\n    return a + b\n",
            function_names: &names(&["add"]),
            framework: Framework::Generic,
            test_code: "def test_add():\n    assert add(2, 3) == 5\n",
            keep_imports: &[],
        });
        assert_eq!(
            combined,
            "def add(a, b):\n    return a + b\n\n\ndef test_add():\n    assert add(2, 3) == 5\n"
        );
    }

    #[test]
    fn flask_combination_adds_app_and_client_fixture() {
        let user = "from flask import Flask\napp = Flask(__name__)\n\n@app.route('/ping')\ndef ping():\n    return 'pong'\n";
        let combined = combine(&CombineRequest {
            user_source: user,
            function_names: &names(&["ping"]),
            framework: Framework::Flask,
            test_code: "def test_ping(client):\n    assert client.get('/ping').data == b'pong'\n",
            keep_imports: &[],
        });
        assert!(combined.starts_with("import pytest\nfrom flask import Flask, request\n"));
        assert_eq!(combined.matches("from flask import Flask").count(), 1);
        assert!(combined.contains("@app.route('/ping')\ndef ping():"));
        assert!(combined.contains("def client():"));
        let fixture_at = combined.find("def client():").expect("fixture");
        let test_at = combined.find("def test_ping").expect("test");
        assert!(fixture_at < test_at);
    }

    #[test]
    fn combination_is_deterministic() {
        let request = CombineRequest {
            user_source: USER,
            function_names: &names(&["a"]),
            framework: Framework::Fastapi,
            test_code: "def test_a():\n    assert a(1) == 'alpha'\n",
            keep_imports: &names(&["math"]),
        };
        assert_eq!(combine(&request), combine(&request));
    }
}
