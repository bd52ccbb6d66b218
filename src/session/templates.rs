//! Project templates seeded into fresh workspaces.
//!
//! A template is a compose file plus the `{path → content}` files written
//! through the platform file manager after the compose is created. Lookup
//! is resilient: unknown ids fall back to the default template rather than
//! failing a session create.

pub struct ProjectTemplate {
    pub id: &'static str,
    pub compose_file: &'static str,
    pub files: &'static [(&'static str, &'static str)],
}

pub const DEFAULT_TEMPLATE_ID: &str = "vite-react";

const VITE_REACT_COMPOSE: &str = r#"services:
  app:
    image: node:20-alpine
    working_dir: /app
    command: sh -c "corepack enable && pnpm install && pnpm dev --host 0.0.0.0 --port 4173"
    volumes:
      - app-src:/app
    expose:
      - "4173"
    restart: unless-stopped
volumes:
  app-src:
"#;

const VITE_REACT_PACKAGE_JSON: &str = r#"{
  "name": "bolt-workspace",
  "private": true,
  "version": "0.0.0",
  "type": "module",
  "scripts": {
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "react": "^18.3.1",
    "react-dom": "^18.3.1"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.3.4",
    "vite": "^6.0.5"
  }
}
"#;

const VITE_REACT_VITE_CONFIG: &str = r#"import { defineConfig } from 'vite';
import react from '@vitejs/plugin-react';

export default defineConfig({
  plugins: [react()],
  server: {
    host: true,
    port: 4173,
    allowedHosts: true,
  },
});
"#;

const VITE_REACT_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Bolt Workspace</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#;

const VITE_REACT_MAIN: &str = r#"import React from 'react';
import ReactDOM from 'react-dom/client';
import App from './App.jsx';
import './index.css';

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
);
"#;

const VITE_REACT_APP: &str = r#"import { useState } from 'react';

export default function App() {
  const [count, setCount] = useState(0);

  return (
    <main>
      <h1>Your workspace is live</h1>
      <p>Edit <code>src/App.jsx</code> and save to see changes.</p>
      <button onClick={() => setCount((c) => c + 1)}>count is {count}</button>
    </main>
  );
}
"#;

const VITE_REACT_CSS: &str = r#":root {
  font-family: system-ui, sans-serif;
  color: #e8e8e8;
  background-color: #17171c;
}

main {
  max-width: 40rem;
  margin: 4rem auto;
  padding: 0 1rem;
  text-align: center;
}

button {
  padding: 0.5rem 1rem;
  border-radius: 8px;
  border: 1px solid #3d3d46;
  background-color: #24242c;
  color: inherit;
  cursor: pointer;
}
"#;

static VITE_REACT: ProjectTemplate = ProjectTemplate {
    id: DEFAULT_TEMPLATE_ID,
    compose_file: VITE_REACT_COMPOSE,
    files: &[
        ("package.json", VITE_REACT_PACKAGE_JSON),
        ("vite.config.js", VITE_REACT_VITE_CONFIG),
        ("index.html", VITE_REACT_INDEX_HTML),
        ("src/main.jsx", VITE_REACT_MAIN),
        ("src/App.jsx", VITE_REACT_APP),
        ("src/index.css", VITE_REACT_CSS),
    ],
};

static TEMPLATES: &[&ProjectTemplate] = &[&VITE_REACT];

/// Resolve a template id; unknown or missing ids fall back to the default.
pub fn resolve(template_id: Option<&str>) -> &'static ProjectTemplate {
    template_id
        .and_then(|id| TEMPLATES.iter().find(|t| t.id == id))
        .copied()
        .unwrap_or(&VITE_REACT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_resolves() {
        assert_eq!(resolve(None).id, DEFAULT_TEMPLATE_ID);
        assert_eq!(resolve(Some("vite-react")).id, DEFAULT_TEMPLATE_ID);
    }

    #[test]
    fn unknown_template_falls_back() {
        assert_eq!(resolve(Some("nextjs")).id, DEFAULT_TEMPLATE_ID);
        assert_eq!(resolve(Some("")).id, DEFAULT_TEMPLATE_ID);
    }

    #[test]
    fn compose_file_serves_the_preview_port() {
        let template = resolve(None);
        assert!(template.compose_file.contains("app:"));
        assert!(template.compose_file.contains("4173"));
    }

    #[test]
    fn files_are_platform_relative() {
        for (path, content) in resolve(None).files {
            assert!(!path.starts_with('/'), "{path}");
            assert!(!path.contains(".."), "{path}");
            assert!(!content.is_empty(), "{path}");
        }
    }

    #[test]
    fn template_seeds_a_dependency_manifest() {
        let paths: Vec<&str> = resolve(None).files.iter().map(|(p, _)| *p).collect();
        assert!(paths.contains(&"package.json"));
        assert!(paths.contains(&"index.html"));
    }
}
